//! Reservation queue endpoints

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
    models::{Pagination, Reservation},
    repository::Store,
    AppState,
};

/// Create reservation request
#[derive(Deserialize, ToSchema)]
pub struct CreateReservationRequest {
    pub book_id: Uuid,
    pub member_id: Uuid,
}

/// Reservation update request; an empty body only touches the reservation
#[derive(Deserialize, ToSchema, Default)]
pub struct UpdateReservationRequest {
    /// `pending`, `fulfilled` or `cancelled`
    #[serde(default)]
    pub status: Option<String>,
}

#[utoipa::path(
    get,
    path = "/reservations",
    tag = "reservations",
    params(Pagination),
    responses(
        (status = 200, description = "Page of reservations", body = Vec<Reservation>)
    )
)]
pub async fn list_reservations<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<Reservation>>> {
    let reservations = state
        .services
        .reservations
        .get_all_reservations(&ctx, &page)
        .await?;
    Ok(Json(reservations))
}

/// Join the wait queue of a book
#[utoipa::path(
    post,
    path = "/reservations",
    tag = "reservations",
    request_body = CreateReservationRequest,
    responses(
        (status = 201, description = "Reservation created", body = Reservation),
        (status = 400, description = "Account suspended", body = crate::error::ErrorResponse),
        (status = 404, description = "Book or member not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Member already waiting for this book", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_reservation<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Json(request): Json<CreateReservationRequest>,
) -> AppResult<(StatusCode, Json<Reservation>)> {
    let reservation = state
        .services
        .reservations
        .create_reservation(&ctx, request.book_id, request.member_id)
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

#[utoipa::path(
    get,
    path = "/reservations/{id}",
    tag = "reservations",
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    responses(
        (status = 200, description = "Reservation details", body = Reservation),
        (status = 404, description = "Reservation not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_reservation<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(reservation_id): Path<Uuid>,
) -> AppResult<Json<Reservation>> {
    let reservation = state
        .services
        .reservations
        .get_reservation_by_id(&ctx, reservation_id)
        .await?;
    Ok(Json(reservation))
}

/// Change a reservation's status
#[utoipa::path(
    put,
    path = "/reservations/{id}",
    tag = "reservations",
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    request_body = UpdateReservationRequest,
    responses(
        (status = 200, description = "Reservation updated", body = Reservation),
        (status = 400, description = "Invalid status or reservation closed", body = crate::error::ErrorResponse),
        (status = 404, description = "Reservation not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_reservation<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(reservation_id): Path<Uuid>,
    Json(request): Json<UpdateReservationRequest>,
) -> AppResult<Json<Reservation>> {
    let reservation = state
        .services
        .reservations
        .update_reservation(&ctx, reservation_id, request.status.as_deref())
        .await?;
    Ok(Json(reservation))
}

/// Delete a reservation, leaving the queue if still pending
#[utoipa::path(
    delete,
    path = "/reservations/{id}",
    tag = "reservations",
    params(
        ("id" = Uuid, Path, description = "Reservation ID")
    ),
    responses(
        (status = 204, description = "Reservation deleted"),
        (status = 404, description = "Reservation not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_reservation<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(reservation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .services
        .reservations
        .delete_reservation(&ctx, reservation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pending reservations of a book in queue order
#[utoipa::path(
    get,
    path = "/books/{id}/reservations",
    tag = "reservations",
    params(
        ("id" = Uuid, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Wait queue", body = Vec<Reservation>),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_book_queue<S: Store>(
    State(state): State<AppState<S>>,
    ctx: RequestContext,
    Path(book_id): Path<Uuid>,
) -> AppResult<Json<Vec<Reservation>>> {
    let queue = state.services.reservations.queue_for_book(&ctx, book_id).await?;
    Ok(Json(queue))
}
