//! Reservation (wait queue entry) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::enums::ReservationStatus;

/// Reservation model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Reservation {
    pub id: Uuid,
    pub book_id: Uuid,
    pub member_id: Uuid,
    pub reservation_date: DateTime<Utc>,
    pub status: ReservationStatus,
    /// 1-based rank among the book's pending reservations
    pub queue_position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reservation row to insert
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub book_id: Uuid,
    pub member_id: Uuid,
    pub reservation_date: DateTime<Utc>,
    pub queue_position: i32,
}
