//! Member lookups on Repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::{MemberStore, Repository};
use crate::{
    error::{AppError, AppResult},
    models::Member,
};

#[derive(FromRow)]
struct MemberRow {
    id: Uuid,
    email: String,
    password_hash: String,
    full_name: String,
    role: String,
    account_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for Member {
    type Error = AppError;

    fn try_from(row: MemberRow) -> AppResult<Self> {
        Ok(Member {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            full_name: row.full_name,
            role: row
                .role
                .parse()
                .map_err(|e| AppError::Internal(format!("member {}: {}", row.id, e)))?,
            account_status: row
                .account_status
                .parse()
                .map_err(|e| AppError::Internal(format!("member {}: {}", row.id, e)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl MemberStore for Repository {
    async fn find_member(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Member>> {
        sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT id, email, password_hash, full_name, role, account_status, created_at, updated_at
            FROM members
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .map(Member::try_from)
        .transpose()
    }
}
