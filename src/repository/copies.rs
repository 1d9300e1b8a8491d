//! Book copy ledger on Repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::{CopyStore, Repository};
use crate::{
    error::{AppError, AppResult},
    models::{BookCopy, CopyFilter, CopyStatus, Pagination},
};

#[derive(FromRow)]
struct CopyRow {
    id: i64,
    book_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CopyRow> for BookCopy {
    type Error = AppError;

    fn try_from(row: CopyRow) -> AppResult<Self> {
        Ok(BookCopy {
            id: row.id,
            book_id: row.book_id,
            status: parse_status(row.id, &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_status(copy_id: i64, status: &str) -> AppResult<CopyStatus> {
    status
        .parse()
        .map_err(|e| AppError::Internal(format!("copy {}: {}", copy_id, e)))
}

fn into_copies(rows: Vec<CopyRow>) -> AppResult<Vec<BookCopy>> {
    rows.into_iter().map(BookCopy::try_from).collect()
}

#[async_trait]
impl CopyStore for Repository {
    async fn insert_copies(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
        status: CopyStatus,
        count: u32,
    ) -> AppResult<Vec<BookCopy>> {
        // One statement, so the batch is inserted entirely or not at all
        let rows = sqlx::query_as::<_, CopyRow>(
            r#"
            INSERT INTO book_copies (book_id, status)
            SELECT $1, $2 FROM generate_series(1, $3)
            RETURNING id, book_id, status, created_at, updated_at
            "#,
        )
        .bind(book_id)
        .bind(status.as_str())
        .bind(count as i32)
        .fetch_all(&mut **tx)
        .await?;

        into_copies(rows)
    }

    async fn find_copy(&self, tx: &mut Self::Tx, id: i64) -> AppResult<Option<BookCopy>> {
        sqlx::query_as::<_, CopyRow>(
            r#"
            SELECT id, book_id, status, created_at, updated_at
            FROM book_copies
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .map(BookCopy::try_from)
        .transpose()
    }

    async fn write_copy_status(
        &self,
        tx: &mut Self::Tx,
        id: i64,
        status: CopyStatus,
    ) -> AppResult<Option<BookCopy>> {
        sqlx::query_as::<_, CopyRow>(
            r#"
            UPDATE book_copies
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING id, book_id, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&mut **tx)
        .await?
        .map(BookCopy::try_from)
        .transpose()
    }

    async fn transition_copy(
        &self,
        tx: &mut Self::Tx,
        id: i64,
        from: &[CopyStatus],
        to: CopyStatus,
    ) -> AppResult<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let result = sqlx::query(
            r#"
            UPDATE book_copies
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL AND status = ANY($3)
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(from)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_copies(
        &self,
        tx: &mut Self::Tx,
        filter: &CopyFilter,
        page: &Pagination,
    ) -> AppResult<Vec<BookCopy>> {
        let rows = sqlx::query_as::<_, CopyRow>(
            r#"
            SELECT id, book_id, status, created_at, updated_at
            FROM book_copies
            WHERE deleted_at IS NULL
              AND ($1::uuid IS NULL OR book_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.book_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&mut **tx)
        .await?;

        into_copies(rows)
    }

    async fn count_copies_by_status(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
    ) -> AppResult<Vec<(CopyStatus, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM book_copies
            WHERE book_id = $1 AND deleted_at IS NULL
            GROUP BY status
            "#,
        )
        .bind(book_id)
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter()
            .map(|(status, count)| {
                let status = status
                    .parse()
                    .map_err(|e| AppError::Internal(format!("book {}: {}", book_id, e)))?;
                Ok((status, count))
            })
            .collect()
    }

    async fn soft_delete_copy(&self, tx: &mut Self::Tx, id: i64) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE book_copies
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL AND status <> $2
            "#,
        )
        .bind(id)
        .bind(CopyStatus::Loaned.as_str())
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
