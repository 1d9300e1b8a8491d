//! Copy ledger endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    models::{Availability, BookCopy, CopyFilter, CopyQuery, CopyStatus, Pagination},
    repository::Store,
    AppState,
};

/// Create copies request
#[derive(Deserialize, ToSchema)]
pub struct CreateCopiesRequest {
    /// Number of copies to create
    pub count: u32,
    /// Initial status (default: available)
    pub status: Option<String>,
}

/// Copy status update request
#[derive(Deserialize, ToSchema)]
pub struct UpdateCopyRequest {
    pub status: String,
}

fn parse_copy_status(token: &str) -> AppResult<CopyStatus> {
    token
        .parse()
        .map_err(|_| AppError::bad_request("copy status invalid"))
}

/// Create a batch of copies for a book
#[utoipa::path(
    post,
    path = "/books/{id}/copies",
    tag = "copies",
    params(
        ("id" = Uuid, Path, description = "Book ID")
    ),
    request_body = CreateCopiesRequest,
    responses(
        (status = 201, description = "Copies created", body = Vec<BookCopy>),
        (status = 400, description = "Invalid count or status", body = crate::error::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_copies<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(book_id): Path<Uuid>,
    Json(request): Json<CreateCopiesRequest>,
) -> AppResult<(StatusCode, Json<Vec<BookCopy>>)> {
    let status = match request.status.as_deref() {
        Some(token) => parse_copy_status(token)?,
        None => CopyStatus::Available,
    };

    let copies = state
        .services
        .copies
        .create_batch(&ctx, book_id, status, request.count)
        .await?;
    Ok((StatusCode::CREATED, Json(copies)))
}

/// Copy counts per status for a book
#[utoipa::path(
    get,
    path = "/books/{id}/availability",
    tag = "copies",
    params(
        ("id" = Uuid, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Availability summary", body = Availability),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_availability<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(book_id): Path<Uuid>,
) -> AppResult<Json<Availability>> {
    let availability = state.services.copies.availability(&ctx, book_id).await?;
    Ok(Json(availability))
}

/// List copies filtered by book and status
#[utoipa::path(
    get,
    path = "/copies",
    tag = "copies",
    params(CopyQuery, Pagination),
    responses(
        (status = 200, description = "Matching copies", body = Vec<BookCopy>),
        (status = 400, description = "Unknown status", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_copies<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Query(query): Query<CopyQuery>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<BookCopy>>> {
    let filter =
        CopyFilter::try_from(query).map_err(|_| AppError::bad_request("copy status invalid"))?;
    let copies = state
        .services
        .copies
        .find_by_condition(&ctx, &filter, &page)
        .await?;
    Ok(Json(copies))
}

/// Get a copy by ID
#[utoipa::path(
    get,
    path = "/copies/{id}",
    tag = "copies",
    params(
        ("id" = i64, Path, description = "Copy ID")
    ),
    responses(
        (status = 200, description = "Copy details", body = BookCopy),
        (status = 404, description = "Copy not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_copy<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(copy_id): Path<i64>,
) -> AppResult<Json<BookCopy>> {
    let copy = state.services.copies.get_by_id(&ctx, copy_id).await?;
    Ok(Json(copy))
}

/// Overwrite a copy's status
#[utoipa::path(
    put,
    path = "/copies/{id}",
    tag = "copies",
    params(
        ("id" = i64, Path, description = "Copy ID")
    ),
    request_body = UpdateCopyRequest,
    responses(
        (status = 200, description = "Copy updated", body = BookCopy),
        (status = 400, description = "Unknown status", body = crate::error::ErrorResponse),
        (status = 404, description = "Copy not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_copy<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(copy_id): Path<i64>,
    Json(request): Json<UpdateCopyRequest>,
) -> AppResult<Json<BookCopy>> {
    let status = parse_copy_status(&request.status)?;
    let copy = state.services.copies.set_status(&ctx, copy_id, status).await?;
    Ok(Json(copy))
}

/// Delete a copy
#[utoipa::path(
    delete,
    path = "/copies/{id}",
    tag = "copies",
    params(
        ("id" = i64, Path, description = "Copy ID")
    ),
    responses(
        (status = 204, description = "Copy deleted"),
        (status = 400, description = "Copy is on loan", body = crate::error::ErrorResponse),
        (status = 404, description = "Copy not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_copy<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(copy_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.services.copies.delete_by_id(&ctx, copy_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
