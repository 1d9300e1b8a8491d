//! Loan model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::enums::LoanStatus;

/// Loan model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Loan {
    pub id: Uuid,
    pub member_id: Uuid,
    pub copy_id: i64,
    pub loan_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Loan row to insert
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub member_id: Uuid,
    pub copy_id: i64,
    pub loan_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

/// Status change applied to an open loan
#[derive(Debug, Clone, Copy)]
pub struct LoanTransition {
    pub status: LoanStatus,
    pub return_date: Option<DateTime<Utc>>,
}
