//! API handlers for circulation REST endpoints

pub mod copies;
pub mod health;
pub mod loans;
pub mod openapi;
pub mod reservations;

use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    context::{RequestContext, REQUEST_ID_HEADER},
    repository::Store,
    AppState,
};

fn header_trace_id(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers.get(REQUEST_ID_HEADER).and_then(|value| value.to_str().ok())
}

/// Extractor for the request context set up by [`propagate_request_id`]
#[async_trait]
impl<St> FromRequestParts<St> for RequestContext
where
    St: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<RequestContext>() {
            return Ok(ctx.clone());
        }
        Ok(RequestContext::from_header(header_trace_id(&parts.headers)))
    }
}

/// Attach a [`RequestContext`] to the request and echo its trace id in the response
pub async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let ctx = RequestContext::from_header(header_trace_id(request.headers()));
    let header = HeaderValue::from_str(&ctx.trace_id).ok();
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Create the application router with all routes
pub fn router<S: Store>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check::<S>))
        // Books
        .route("/books/:id/copies", post(copies::create_copies::<S>))
        .route("/books/:id/availability", get(copies::get_availability::<S>))
        .route("/books/:id/reservations", get(reservations::get_book_queue::<S>))
        // Copies
        .route("/copies", get(copies::list_copies::<S>))
        .route(
            "/copies/:id",
            get(copies::get_copy::<S>)
                .put(copies::update_copy::<S>)
                .delete(copies::delete_copy::<S>),
        )
        // Loans
        .route("/loans", get(loans::list_loans::<S>).post(loans::create_loan::<S>))
        .route(
            "/loans/:id",
            get(loans::get_loan::<S>)
                .put(loans::update_loan::<S>)
                .delete(loans::delete_loan::<S>),
        )
        // Reservations
        .route(
            "/reservations",
            get(reservations::list_reservations::<S>).post(reservations::create_reservation::<S>),
        )
        .route(
            "/reservations/:id",
            get(reservations::get_reservation::<S>)
                .put(reservations::update_reservation::<S>)
                .delete(reservations::delete_reservation::<S>),
        )
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi::create_openapi_router())
        .layer(middleware::from_fn(propagate_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
