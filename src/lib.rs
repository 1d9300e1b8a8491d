//! Library circulation server
//!
//! Tracks physical book copies, lends them to members and keeps per-book
//! reservation queues, behind a REST JSON API.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use context::RequestContext;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState<S = repository::Repository> {
    pub services: Arc<services::Services<S>>,
}
