//! Reservation queue on Repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Repository, ReservationStore};
use crate::{
    error::{AppError, AppResult},
    models::{NewReservation, Pagination, Reservation, ReservationStatus},
};

const RESERVATION_COLUMNS: &str =
    "id, book_id, member_id, reservation_date, status, queue_position, created_at, updated_at";

#[derive(FromRow)]
struct ReservationRow {
    id: Uuid,
    book_id: Uuid,
    member_id: Uuid,
    reservation_date: DateTime<Utc>,
    status: String,
    queue_position: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> AppResult<Self> {
        Ok(Reservation {
            id: row.id,
            book_id: row.book_id,
            member_id: row.member_id,
            reservation_date: row.reservation_date,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("reservation {}: {}", row.id, e)))?,
            queue_position: row.queue_position,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_reservations(rows: Vec<ReservationRow>) -> AppResult<Vec<Reservation>> {
    rows.into_iter().map(Reservation::try_from).collect()
}

#[async_trait]
impl ReservationStore for Repository {
    async fn insert_reservation(
        &self,
        tx: &mut Self::Tx,
        reservation: &NewReservation,
    ) -> AppResult<Reservation> {
        let query = format!(
            r#"
            INSERT INTO reservations (book_id, member_id, reservation_date, status, queue_position)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        let row = sqlx::query_as::<_, ReservationRow>(&query)
            .bind(reservation.book_id)
            .bind(reservation.member_id)
            .bind(reservation.reservation_date)
            .bind(ReservationStatus::Pending.as_str())
            .bind(reservation.queue_position)
            .fetch_one(&mut **tx)
            .await?;

        Reservation::try_from(row)
    }

    async fn find_reservation(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Reservation>> {
        let query = format!(
            "SELECT {} FROM reservations WHERE id = $1 AND deleted_at IS NULL",
            RESERVATION_COLUMNS
        );

        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn last_queue_position(&self, tx: &mut Self::Tx, book_id: Uuid) -> AppResult<i32> {
        let last: i32 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(queue_position), 0)
            FROM reservations
            WHERE book_id = $1 AND status = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(book_id)
        .bind(ReservationStatus::Pending.as_str())
        .fetch_one(&mut **tx)
        .await?;

        Ok(last)
    }

    async fn pending_for_member(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
        member_id: Uuid,
    ) -> AppResult<Option<Reservation>> {
        let query = format!(
            r#"
            SELECT {} FROM reservations
            WHERE book_id = $1 AND member_id = $2 AND status = $3 AND deleted_at IS NULL
            "#,
            RESERVATION_COLUMNS
        );

        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(book_id)
            .bind(member_id)
            .bind(ReservationStatus::Pending.as_str())
            .fetch_optional(&mut **tx)
            .await?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn set_reservation_status(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        status: ReservationStatus,
    ) -> AppResult<Option<Reservation>> {
        let query = format!(
            r#"
            UPDATE reservations
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&mut **tx)
            .await?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn compact_queue(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
        after_position: i32,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET queue_position = queue_position - 1, updated_at = NOW()
            WHERE book_id = $1 AND status = $2 AND deleted_at IS NULL AND queue_position > $3
            "#,
        )
        .bind(book_id)
        .bind(ReservationStatus::Pending.as_str())
        .bind(after_position)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn soft_delete_reservation(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_reservations(
        &self,
        tx: &mut Self::Tx,
        page: &Pagination,
    ) -> AppResult<Vec<Reservation>> {
        let query = format!(
            "SELECT {} FROM reservations WHERE deleted_at IS NULL ORDER BY created_at, id LIMIT $1 OFFSET $2",
            RESERVATION_COLUMNS
        );

        let rows = sqlx::query_as::<_, ReservationRow>(&query)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&mut **tx)
            .await?;

        into_reservations(rows)
    }

    async fn queue_for_book(&self, tx: &mut Self::Tx, book_id: Uuid) -> AppResult<Vec<Reservation>> {
        let query = format!(
            r#"
            SELECT {} FROM reservations
            WHERE book_id = $1 AND status = $2 AND deleted_at IS NULL
            ORDER BY queue_position
            "#,
            RESERVATION_COLUMNS
        );

        let rows = sqlx::query_as::<_, ReservationRow>(&query)
            .bind(book_id)
            .bind(ReservationStatus::Pending.as_str())
            .fetch_all(&mut **tx)
            .await?;

        into_reservations(rows)
    }
}
