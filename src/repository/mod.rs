//! Repository layer for database operations
//!
//! Storage is reached through the store traits below so every workflow can
//! run its steps inside one transaction. [`Repository`] implements them on
//! Postgres; [`memory::MemoryStore`] implements them in process.

pub mod books;
pub mod copies;
pub mod loans;
pub mod members;
pub mod memory;
pub mod reservations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        loan::LoanTransition, BookCopy, CopyFilter, CopyStatus, Loan, Member, NewLoan,
        NewReservation, Pagination, Reservation, ReservationStatus,
    },
};

/// Begin/commit boundary shared by all stores of one backend.
///
/// Dropping a transaction without committing rolls every write back.
#[async_trait]
pub trait Transactional: Clone + Send + Sync + 'static {
    type Tx: Send;

    async fn begin(&self) -> AppResult<Self::Tx>;
    async fn commit(&self, tx: Self::Tx) -> AppResult<()>;
}

/// Read-only member lookup
#[async_trait]
pub trait MemberStore: Transactional {
    async fn find_member(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Member>>;
}

#[async_trait]
pub trait BookStore: Transactional {
    async fn book_exists(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool>;

    /// Lock the book row until the transaction ends; false when there is no such book
    async fn lock_book(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool>;
}

/// Copy ledger storage. No transition rules are enforced here.
#[async_trait]
pub trait CopyStore: Transactional {
    async fn insert_copies(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
        status: CopyStatus,
        count: u32,
    ) -> AppResult<Vec<BookCopy>>;

    async fn find_copy(&self, tx: &mut Self::Tx, id: i64) -> AppResult<Option<BookCopy>>;

    /// Unconditional status write; `None` when the copy does not exist
    async fn write_copy_status(
        &self,
        tx: &mut Self::Tx,
        id: i64,
        status: CopyStatus,
    ) -> AppResult<Option<BookCopy>>;

    /// Conditional status write; true only if the current status was one of `from`
    async fn transition_copy(
        &self,
        tx: &mut Self::Tx,
        id: i64,
        from: &[CopyStatus],
        to: CopyStatus,
    ) -> AppResult<bool>;

    async fn find_copies(
        &self,
        tx: &mut Self::Tx,
        filter: &CopyFilter,
        page: &Pagination,
    ) -> AppResult<Vec<BookCopy>>;

    async fn count_copies_by_status(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
    ) -> AppResult<Vec<(CopyStatus, i64)>>;

    /// Soft delete a copy that is not on loan; false if nothing was deleted
    async fn soft_delete_copy(&self, tx: &mut Self::Tx, id: i64) -> AppResult<bool>;
}

#[async_trait]
pub trait LoanStore: Transactional {
    async fn insert_loan(&self, tx: &mut Self::Tx, loan: &NewLoan) -> AppResult<Loan>;

    async fn find_loan(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Loan>>;

    /// Same as `find_loan` but holds the row until the transaction ends
    async fn lock_loan(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Loan>>;

    async fn update_loan_status(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        transition: LoanTransition,
    ) -> AppResult<Option<Loan>>;

    async fn soft_delete_loan(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool>;

    async fn list_loans(&self, tx: &mut Self::Tx, page: &Pagination) -> AppResult<Vec<Loan>>;

    /// Move every active loan due before `now` to overdue; returns how many moved
    async fn flag_overdue_loans(&self, tx: &mut Self::Tx, now: DateTime<Utc>) -> AppResult<u64>;
}

#[async_trait]
pub trait ReservationStore: Transactional {
    async fn insert_reservation(
        &self,
        tx: &mut Self::Tx,
        reservation: &NewReservation,
    ) -> AppResult<Reservation>;

    async fn find_reservation(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Reservation>>;

    /// Highest pending position for the book, 0 when the queue is empty
    async fn last_queue_position(&self, tx: &mut Self::Tx, book_id: Uuid) -> AppResult<i32>;

    async fn pending_for_member(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
        member_id: Uuid,
    ) -> AppResult<Option<Reservation>>;

    /// Write the status and touch `updated_at`
    async fn set_reservation_status(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        status: ReservationStatus,
    ) -> AppResult<Option<Reservation>>;

    /// Decrement every pending position above `after_position` for the book
    async fn compact_queue(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
        after_position: i32,
    ) -> AppResult<u64>;

    async fn soft_delete_reservation(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool>;

    async fn list_reservations(
        &self,
        tx: &mut Self::Tx,
        page: &Pagination,
    ) -> AppResult<Vec<Reservation>>;

    /// Pending reservations of a book in queue order
    async fn queue_for_book(&self, tx: &mut Self::Tx, book_id: Uuid) -> AppResult<Vec<Reservation>>;
}

/// Everything the circulation services need from a backend
pub trait Store: MemberStore + BookStore + CopyStore + LoanStore + ReservationStore {}

impl<T> Store for T where T: MemberStore + BookStore + CopyStore + LoanStore + ReservationStore {}

/// Postgres-backed store holding the connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Transactional for Repository {
    type Tx = sqlx::Transaction<'static, Postgres>;

    async fn begin(&self) -> AppResult<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> AppResult<()> {
        tx.commit().await?;
        Ok(())
    }
}
