//! Book existence checks and row locks on Repository
//!
//! Catalog editing lives elsewhere; circulation only needs to know a book
//! exists and to serialize queue changes on its row.

use async_trait::async_trait;
use uuid::Uuid;

use super::{BookStore, Repository};
use crate::error::AppResult;

#[async_trait]
impl BookStore for Repository {
    async fn book_exists(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM books WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(exists)
    }

    async fn lock_book(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool> {
        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM books WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(locked.is_some())
    }
}
