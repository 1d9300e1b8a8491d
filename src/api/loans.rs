//! Loan management endpoints

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
    error::AppResult,
    models::{Loan, Pagination},
    repository::Store,
    AppState,
};

/// Create loan request
#[derive(Deserialize, ToSchema)]
pub struct CreateLoanRequest {
    /// Borrowing member
    pub member_id: Uuid,
    /// Copy to lend
    #[serde(alias = "book_copy_id")]
    pub copy_id: i64,
}

/// Loan status change request
#[derive(Deserialize, ToSchema)]
pub struct UpdateLoanRequest {
    /// `returned` or `overdue`
    pub status: String,
    /// Must match the loan's copy when given
    #[serde(default, alias = "book_copy_id")]
    pub copy_id: Option<i64>,
    /// `damaged` or `lost` when the copy comes back unusable
    #[serde(default, alias = "book_status")]
    pub copy_status: Option<String>,
}

/// List loans
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    params(Pagination),
    responses(
        (status = 200, description = "Page of loans", body = Vec<Loan>)
    )
)]
pub async fn list_loans<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<Loan>>> {
    let loans = state.services.loans.get_all_loans(&ctx, &page).await?;
    Ok(Json(loans))
}

/// Create a new loan (borrow a copy)
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    request_body = CreateLoanRequest,
    responses(
        (status = 201, description = "Loan created", body = Loan),
        (status = 400, description = "Account suspended or copy unavailable", body = crate::error::ErrorResponse),
        (status = 404, description = "Member or copy not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_loan<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Json(request): Json<CreateLoanRequest>,
) -> AppResult<(StatusCode, Json<Loan>)> {
    let loan = state
        .services
        .loans
        .create_loan(&ctx, request.member_id, request.copy_id)
        .await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// Get a loan by ID
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    params(
        ("id" = Uuid, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan details", body = Loan),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_loan<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.get_loan_by_id(&ctx, loan_id).await?;
    Ok(Json(loan))
}

/// Return a loan or flag it overdue
#[utoipa::path(
    put,
    path = "/loans/{id}",
    tag = "loans",
    params(
        ("id" = Uuid, Path, description = "Loan ID")
    ),
    request_body = UpdateLoanRequest,
    responses(
        (status = 200, description = "Loan updated", body = Loan),
        (status = 400, description = "Invalid status or loan already returned", body = crate::error::ErrorResponse),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_loan<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<UpdateLoanRequest>,
) -> AppResult<Json<Loan>> {
    let loan = state
        .services
        .loans
        .update_loan(
            &ctx,
            loan_id,
            &request.status,
            request.copy_id,
            request.copy_status.as_deref(),
        )
        .await?;
    Ok(Json(loan))
}

/// Delete a closed loan
#[utoipa::path(
    delete,
    path = "/loans/{id}",
    tag = "loans",
    params(
        ("id" = Uuid, Path, description = "Loan ID")
    ),
    responses(
        (status = 204, description = "Loan deleted"),
        (status = 400, description = "Loan still open", body = crate::error::ErrorResponse),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_loan<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(loan_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.services.loans.delete_loan(&ctx, loan_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
