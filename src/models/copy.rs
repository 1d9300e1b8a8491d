//! Book copy (physical lending unit) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::enums::{CopyStatus, UnknownStatus};

/// Book copy model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BookCopy {
    pub id: i64,
    pub book_id: Uuid,
    pub status: CopyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filters for copy listing; both are optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyFilter {
    pub book_id: Option<Uuid>,
    pub status: Option<CopyStatus>,
}

/// Raw copy listing query; the status token is matched case-insensitively
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CopyQuery {
    pub book_id: Option<Uuid>,
    /// available, loaned, reserved, damaged or lost
    pub status: Option<String>,
}

impl TryFrom<CopyQuery> for CopyFilter {
    type Error = UnknownStatus;

    fn try_from(query: CopyQuery) -> Result<Self, Self::Error> {
        let status = match query.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(token) => Some(token.parse()?),
        };
        Ok(CopyFilter {
            book_id: query.book_id,
            status,
        })
    }
}

/// Per-status copy counts for one book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Availability {
    pub book_id: Uuid,
    pub total: i64,
    pub available: i64,
    pub loaned: i64,
    pub reserved: i64,
    pub damaged: i64,
    pub lost: i64,
    /// Copies that can be handed out right now (damaged and lost never count)
    pub lendable: i64,
}

impl Availability {
    pub fn from_counts(book_id: Uuid, counts: &[(CopyStatus, i64)]) -> Self {
        let mut availability = Availability {
            book_id,
            ..Default::default()
        };
        for (status, count) in counts {
            match status {
                CopyStatus::Available => availability.available += count,
                CopyStatus::Loaned => availability.loaned += count,
                CopyStatus::Reserved => availability.reserved += count,
                CopyStatus::Damaged => availability.damaged += count,
                CopyStatus::Lost => availability.lost += count,
            }
            availability.total += count;
        }
        availability.lendable = availability.available;
        availability
    }
}
