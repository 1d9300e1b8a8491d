//! Member model
//!
//! Members are registered and maintained outside circulation; this crate
//! only reads them to check standing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AccountStatus, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub account_status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    /// Only active members may open loans or join a reservation queue
    pub fn is_active(&self) -> bool {
        self.account_status == AccountStatus::Active
    }
}
