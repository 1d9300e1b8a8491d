//! Reservation queue service
//!
//! Each book has a wait list of pending reservations ranked 1..n. Every
//! change to a book's queue happens with the book row locked, and a
//! reservation leaving the pending set closes the gap it leaves behind.
//!
//! Copies in `reserved` status are held for the head of the queue: there
//! are never more of them than pending reservations for the book.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    models::{CopyFilter, CopyStatus, NewReservation, Pagination, Reservation, ReservationStatus},
    repository::Store,
};

/// Take a pending reservation out of its queue and renumber the rest.
///
/// The caller must hold the book lock in `tx`.
pub(crate) async fn leave_queue<S: Store>(
    store: &S,
    tx: &mut S::Tx,
    reservation: &Reservation,
    status: ReservationStatus,
) -> AppResult<Reservation> {
    let updated = store
        .set_reservation_status(tx, reservation.id, status)
        .await?
        .ok_or_else(|| AppError::not_found("reservation"))?;
    let moved = store
        .compact_queue(tx, reservation.book_id, reservation.queue_position)
        .await?;

    tracing::debug!(
        reservation_id = %reservation.id,
        book_id = %reservation.book_id,
        "Compacted queue after position {}, {} reservations moved up",
        reservation.queue_position,
        moved
    );

    release_surplus_reserved(store, tx, reservation.book_id).await?;
    Ok(updated)
}

/// Number of `reserved` copies and of pending reservations for a book.
///
/// The caller must hold the book lock in `tx`.
pub(crate) async fn held_and_waiting<S: Store>(
    store: &S,
    tx: &mut S::Tx,
    book_id: Uuid,
) -> AppResult<(i64, i64)> {
    let held: i64 = store
        .count_copies_by_status(tx, book_id)
        .await?
        .into_iter()
        .filter(|(status, _)| *status == CopyStatus::Reserved)
        .map(|(_, count)| count)
        .sum();
    let waiting = store.queue_for_book(tx, book_id).await?.len() as i64;
    Ok((held, waiting))
}

/// Put `reserved` copies nobody is waiting for back on the shelf.
///
/// The caller must hold the book lock in `tx`.
pub(crate) async fn release_surplus_reserved<S: Store>(
    store: &S,
    tx: &mut S::Tx,
    book_id: Uuid,
) -> AppResult<u64> {
    let (held, waiting) = held_and_waiting(store, tx, book_id).await?;
    if held <= waiting {
        return Ok(0);
    }

    let filter = CopyFilter {
        book_id: Some(book_id),
        status: Some(CopyStatus::Reserved),
    };
    let surplus = store
        .find_copies(tx, &filter, &Pagination::new(1, held - waiting))
        .await?;

    let mut released = 0;
    for copy in &surplus {
        if store
            .transition_copy(tx, copy.id, &[CopyStatus::Reserved], CopyStatus::Available)
            .await?
        {
            released += 1;
        }
    }

    tracing::debug!(%book_id, "Released {} reserved copies back to available", released);
    Ok(released)
}

/// Parse an optional status token; blank means "no status change"
fn parse_status(token: Option<&str>) -> AppResult<Option<ReservationStatus>> {
    match token.map(str::trim) {
        None | Some("") => Ok(None),
        Some(token) => token
            .parse()
            .map(Some)
            .map_err(|_| AppError::bad_request("status invalid")),
    }
}

#[derive(Clone)]
pub struct ReservationsService<S> {
    store: S,
}

impl<S: Store> ReservationsService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Append a member to the tail of a book's queue
    pub async fn create_reservation(
        &self,
        ctx: &RequestContext,
        book_id: Uuid,
        member_id: Uuid,
    ) -> AppResult<Reservation> {
        tracing::info!(trace_id = %ctx.trace_id, %book_id, %member_id, "Create reservation");

        let mut tx = self.store.begin().await?;

        let member = self
            .store
            .find_member(&mut tx, member_id)
            .await?
            .ok_or_else(|| AppError::not_found("member"))?;
        if !member.is_active() {
            tracing::warn!(trace_id = %ctx.trace_id, %member_id, "Member account is not active");
            return Err(AppError::bad_request("account suspended"));
        }

        if !self.store.lock_book(&mut tx, book_id).await? {
            return Err(AppError::not_found("book"));
        }

        if self
            .store
            .pending_for_member(&mut tx, book_id, member_id)
            .await?
            .is_some()
        {
            return Err(AppError::duplicate("reservation"));
        }

        let last = self.store.last_queue_position(&mut tx, book_id).await?;
        let reservation = self
            .store
            .insert_reservation(
                &mut tx,
                &NewReservation {
                    book_id,
                    member_id,
                    reservation_date: Utc::now(),
                    queue_position: last + 1,
                },
            )
            .await?;
        self.store.commit(tx).await?;

        tracing::info!(
            trace_id = %ctx.trace_id,
            reservation_id = %reservation.id,
            queue_position = reservation.queue_position,
            "Reservation created"
        );
        Ok(reservation)
    }

    /// Change a reservation's status; leaving `pending` compacts the queue
    pub async fn update_reservation(
        &self,
        ctx: &RequestContext,
        reservation_id: Uuid,
        status_token: Option<&str>,
    ) -> AppResult<Reservation> {
        let new_status = parse_status(status_token)?;

        let mut tx = self.store.begin().await?;
        let current = self.locked_reservation(&mut tx, reservation_id).await?;

        let updated = match new_status {
            None => self.touch(&mut tx, &current).await?,
            Some(status) if status == current.status => self.touch(&mut tx, &current).await?,
            Some(_) if current.status != ReservationStatus::Pending => {
                tracing::warn!(
                    trace_id = %ctx.trace_id,
                    %reservation_id,
                    status = %current.status,
                    "Reservation already left the queue"
                );
                return Err(AppError::bad_request("reservation closed"));
            }
            Some(status) => leave_queue(&self.store, &mut tx, &current, status).await?,
        };
        self.store.commit(tx).await?;

        tracing::info!(
            trace_id = %ctx.trace_id,
            %reservation_id,
            status = %updated.status,
            "Reservation updated"
        );
        Ok(updated)
    }

    /// Soft delete; a pending reservation also gives up its queue slot
    pub async fn delete_reservation(&self, ctx: &RequestContext, reservation_id: Uuid) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        let current = self.locked_reservation(&mut tx, reservation_id).await?;

        self.store.soft_delete_reservation(&mut tx, reservation_id).await?;
        if current.status == ReservationStatus::Pending {
            self.store
                .compact_queue(&mut tx, current.book_id, current.queue_position)
                .await?;
            release_surplus_reserved(&self.store, &mut tx, current.book_id).await?;
        }
        self.store.commit(tx).await?;

        tracing::info!(trace_id = %ctx.trace_id, %reservation_id, "Reservation deleted");
        Ok(())
    }

    pub async fn get_reservation_by_id(
        &self,
        ctx: &RequestContext,
        reservation_id: Uuid,
    ) -> AppResult<Reservation> {
        let mut tx = self.store.begin().await?;
        let reservation = self.store.find_reservation(&mut tx, reservation_id).await?;
        self.store.commit(tx).await?;

        reservation.ok_or_else(|| {
            tracing::debug!(trace_id = %ctx.trace_id, %reservation_id, "Reservation not found");
            AppError::not_found("reservation")
        })
    }

    pub async fn get_all_reservations(
        &self,
        ctx: &RequestContext,
        page: &Pagination,
    ) -> AppResult<Vec<Reservation>> {
        let mut tx = self.store.begin().await?;
        let reservations = self.store.list_reservations(&mut tx, page).await?;
        self.store.commit(tx).await?;

        tracing::debug!(trace_id = %ctx.trace_id, "Fetched {} reservations", reservations.len());
        Ok(reservations)
    }

    /// Pending reservations of a book, head of the queue first
    pub async fn queue_for_book(&self, ctx: &RequestContext, book_id: Uuid) -> AppResult<Vec<Reservation>> {
        let mut tx = self.store.begin().await?;
        if !self.store.book_exists(&mut tx, book_id).await? {
            return Err(AppError::not_found("book"));
        }
        let queue = self.store.queue_for_book(&mut tx, book_id).await?;
        self.store.commit(tx).await?;

        tracing::debug!(trace_id = %ctx.trace_id, %book_id, "Queue length {}", queue.len());
        Ok(queue)
    }

    /// Read the reservation, lock its book, then re-read it under the lock
    async fn locked_reservation(&self, tx: &mut S::Tx, reservation_id: Uuid) -> AppResult<Reservation> {
        let first = self
            .store
            .find_reservation(tx, reservation_id)
            .await?
            .ok_or_else(|| AppError::not_found("reservation"))?;
        self.store.lock_book(tx, first.book_id).await?;
        self.store
            .find_reservation(tx, reservation_id)
            .await?
            .ok_or_else(|| AppError::not_found("reservation"))
    }

    async fn touch(&self, tx: &mut S::Tx, reservation: &Reservation) -> AppResult<Reservation> {
        self.store
            .set_reservation_status(tx, reservation.id, reservation.status)
            .await?
            .ok_or_else(|| AppError::not_found("reservation"))
    }
}
