//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{copies, health, loans, reservations};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Circulation API",
        version = "1.0.0",
        description = "Library circulation REST API: copies, loans and reservation queues"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Copies
        copies::create_copies,
        copies::get_availability,
        copies::list_copies,
        copies::get_copy,
        copies::update_copy,
        copies::delete_copy,
        // Loans
        loans::list_loans,
        loans::create_loan,
        loans::get_loan,
        loans::update_loan,
        loans::delete_loan,
        // Reservations
        reservations::list_reservations,
        reservations::create_reservation,
        reservations::get_reservation,
        reservations::update_reservation,
        reservations::delete_reservation,
        reservations::get_book_queue,
    ),
    components(
        schemas(
            // Copies
            crate::models::BookCopy,
            crate::models::Availability,
            crate::models::CopyStatus,
            copies::CreateCopiesRequest,
            copies::UpdateCopyRequest,
            // Loans
            crate::models::Loan,
            crate::models::LoanStatus,
            loans::CreateLoanRequest,
            loans::UpdateLoanRequest,
            // Reservations
            crate::models::Reservation,
            crate::models::ReservationStatus,
            reservations::CreateReservationRequest,
            reservations::UpdateReservationRequest,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "copies", description = "Copy ledger"),
        (name = "loans", description = "Loan management"),
        (name = "reservations", description = "Reservation queues")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
