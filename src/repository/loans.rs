//! Loans on Repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::{LoanStore, Repository};
use crate::{
    error::{AppError, AppResult},
    models::{loan::LoanTransition, Loan, LoanStatus, NewLoan, Pagination},
};

const LOAN_COLUMNS: &str =
    "id, member_id, copy_id, loan_date, due_date, return_date, status, created_at, updated_at";

#[derive(FromRow)]
struct LoanRow {
    id: Uuid,
    member_id: Uuid,
    copy_id: i64,
    loan_date: DateTime<Utc>,
    due_date: DateTime<Utc>,
    return_date: Option<DateTime<Utc>>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LoanRow> for Loan {
    type Error = AppError;

    fn try_from(row: LoanRow) -> AppResult<Self> {
        Ok(Loan {
            id: row.id,
            member_id: row.member_id,
            copy_id: row.copy_id,
            loan_date: row.loan_date,
            due_date: row.due_date,
            return_date: row.return_date,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("loan {}: {}", row.id, e)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl Repository {
    async fn fetch_loan(
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
        for_update: bool,
    ) -> AppResult<Option<Loan>> {
        let query = format!(
            "SELECT {} FROM loans WHERE id = $1 AND deleted_at IS NULL{}",
            LOAN_COLUMNS,
            if for_update { " FOR UPDATE" } else { "" }
        );

        sqlx::query_as::<_, LoanRow>(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .map(Loan::try_from)
            .transpose()
    }
}

#[async_trait]
impl LoanStore for Repository {
    async fn insert_loan(&self, tx: &mut Self::Tx, loan: &NewLoan) -> AppResult<Loan> {
        let query = format!(
            r#"
            INSERT INTO loans (member_id, copy_id, loan_date, due_date, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            LOAN_COLUMNS
        );

        let row = sqlx::query_as::<_, LoanRow>(&query)
            .bind(loan.member_id)
            .bind(loan.copy_id)
            .bind(loan.loan_date)
            .bind(loan.due_date)
            .bind(LoanStatus::Active.as_str())
            .fetch_one(&mut **tx)
            .await?;

        Loan::try_from(row)
    }

    async fn find_loan(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Loan>> {
        Self::fetch_loan(tx, id, false).await
    }

    async fn lock_loan(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Loan>> {
        Self::fetch_loan(tx, id, true).await
    }

    async fn update_loan_status(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        transition: LoanTransition,
    ) -> AppResult<Option<Loan>> {
        let query = format!(
            r#"
            UPDATE loans
            SET status = $2, return_date = COALESCE($3, return_date), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            LOAN_COLUMNS
        );

        sqlx::query_as::<_, LoanRow>(&query)
            .bind(id)
            .bind(transition.status.as_str())
            .bind(transition.return_date)
            .fetch_optional(&mut **tx)
            .await?
            .map(Loan::try_from)
            .transpose()
    }

    async fn soft_delete_loan(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE loans SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_loans(&self, tx: &mut Self::Tx, page: &Pagination) -> AppResult<Vec<Loan>> {
        let query = format!(
            "SELECT {} FROM loans WHERE deleted_at IS NULL ORDER BY created_at, id LIMIT $1 OFFSET $2",
            LOAN_COLUMNS
        );

        let rows = sqlx::query_as::<_, LoanRow>(&query)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&mut **tx)
            .await?;

        rows.into_iter().map(Loan::try_from).collect()
    }

    async fn flag_overdue_loans(&self, tx: &mut Self::Tx, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET status = $1, updated_at = NOW()
            WHERE status = $2 AND due_date < $3 AND deleted_at IS NULL
            "#,
        )
        .bind(LoanStatus::Overdue.as_str())
        .bind(LoanStatus::Active.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }
}
