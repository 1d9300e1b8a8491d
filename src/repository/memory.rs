//! In-process store with the same semantics as the Postgres repository
//!
//! A transaction holds the whole state behind one async mutex, so
//! transactions are fully serialized. The state is snapshotted when the
//! transaction begins and restored if it is dropped without a commit.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    BookStore, CopyStore, LoanStore, MemberStore, ReservationStore, Transactional,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        loan::LoanTransition, AccountStatus, BookCopy, CopyFilter, CopyStatus, Loan, LoanStatus,
        Member, NewLoan, NewReservation, Pagination, Reservation, ReservationStatus, Role,
    },
};

#[derive(Debug, Clone)]
struct Row<T> {
    value: T,
    deleted: bool,
}

impl<T> Row<T> {
    fn live(value: T) -> Self {
        Self {
            value,
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    members: HashMap<Uuid, Member>,
    books: HashSet<Uuid>,
    copies: BTreeMap<i64, Row<BookCopy>>,
    next_copy_id: i64,
    loans: Vec<Row<Loan>>,
    reservations: Vec<Row<Reservation>>,
}

impl MemoryState {
    fn live_copy(&mut self, id: i64) -> Option<&mut BookCopy> {
        self.copies
            .get_mut(&id)
            .filter(|row| !row.deleted)
            .map(|row| &mut row.value)
    }

    fn live_loan(&mut self, id: Uuid) -> Option<&mut Loan> {
        self.loans
            .iter_mut()
            .find(|row| !row.deleted && row.value.id == id)
            .map(|row| &mut row.value)
    }

    fn live_reservation(&mut self, id: Uuid) -> Option<&mut Reservation> {
        self.reservations
            .iter_mut()
            .find(|row| !row.deleted && row.value.id == id)
            .map(|row| &mut row.value)
    }

    fn pending(&self, book_id: Uuid) -> impl Iterator<Item = &Reservation> {
        self.reservations
            .iter()
            .filter(|row| !row.deleted)
            .map(|row| &row.value)
            .filter(move |r| r.book_id == book_id && r.status == ReservationStatus::Pending)
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    #[cfg(test)]
    fail_loan_inserts: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_book(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.books.insert(id);
        id
    }

    pub async fn add_member(&self, account_status: AccountStatus) -> Member {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let member = Member {
            id,
            email: format!("{}@example.org", id.simple()),
            password_hash: String::new(),
            full_name: "Test Member".to_string(),
            role: Role::Member,
            account_status,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.members.insert(id, member.clone());
        member
    }

    pub async fn set_account_status(&self, member_id: Uuid, account_status: AccountStatus) {
        if let Some(member) = self.state.lock().await.members.get_mut(&member_id) {
            member.account_status = account_status;
            member.updated_at = Utc::now();
        }
    }

    /// Make every following loan insert fail
    #[cfg(test)]
    pub(crate) fn fail_loan_inserts(&self, fail: bool) {
        self.fail_loan_inserts.store(fail, Ordering::SeqCst);
    }

    /// All non-deleted loans, in creation order
    pub async fn loans(&self) -> Vec<Loan> {
        self.state
            .lock()
            .await
            .loans
            .iter()
            .filter(|row| !row.deleted)
            .map(|row| row.value.clone())
            .collect()
    }

    /// All non-deleted copies, by id
    pub async fn copies(&self) -> Vec<BookCopy> {
        self.state
            .lock()
            .await
            .copies
            .values()
            .filter(|row| !row.deleted)
            .map(|row| row.value.clone())
            .collect()
    }

    /// All non-deleted reservations, in creation order
    pub async fn reservations(&self) -> Vec<Reservation> {
        self.state
            .lock()
            .await
            .reservations
            .iter()
            .filter(|row| !row.deleted)
            .map(|row| row.value.clone())
            .collect()
    }
}

fn page_of<T: Clone>(items: impl Iterator<Item = T>, page: &Pagination) -> Vec<T> {
    let skip = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let take = usize::try_from(page.limit()).unwrap_or(0);
    items.skip(skip).take(take).collect()
}

#[async_trait]
impl Transactional for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> AppResult<Self::Tx> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(MemoryTx {
            guard,
            snapshot: Some(snapshot),
        })
    }

    async fn commit(&self, mut tx: Self::Tx) -> AppResult<()> {
        tx.snapshot = None;
        Ok(())
    }
}

#[async_trait]
impl MemberStore for MemoryStore {
    async fn find_member(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Member>> {
        Ok(tx.guard.members.get(&id).cloned())
    }
}

#[async_trait]
impl BookStore for MemoryStore {
    async fn book_exists(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool> {
        Ok(tx.guard.books.contains(&id))
    }

    async fn lock_book(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool> {
        // The transaction already holds the whole state
        Ok(tx.guard.books.contains(&id))
    }
}

#[async_trait]
impl CopyStore for MemoryStore {
    async fn insert_copies(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
        status: CopyStatus,
        count: u32,
    ) -> AppResult<Vec<BookCopy>> {
        let state = &mut *tx.guard;
        if !state.books.contains(&book_id) {
            return Err(AppError::not_found("book"));
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(count as usize);
        for _ in 0..count {
            state.next_copy_id += 1;
            let copy = BookCopy {
                id: state.next_copy_id,
                book_id,
                status,
                created_at: now,
                updated_at: now,
            };
            state.copies.insert(copy.id, Row::live(copy.clone()));
            created.push(copy);
        }
        Ok(created)
    }

    async fn find_copy(&self, tx: &mut Self::Tx, id: i64) -> AppResult<Option<BookCopy>> {
        Ok(tx.guard.live_copy(id).map(|copy| copy.clone()))
    }

    async fn write_copy_status(
        &self,
        tx: &mut Self::Tx,
        id: i64,
        status: CopyStatus,
    ) -> AppResult<Option<BookCopy>> {
        Ok(tx.guard.live_copy(id).map(|copy| {
            copy.status = status;
            copy.updated_at = Utc::now();
            copy.clone()
        }))
    }

    async fn transition_copy(
        &self,
        tx: &mut Self::Tx,
        id: i64,
        from: &[CopyStatus],
        to: CopyStatus,
    ) -> AppResult<bool> {
        match tx.guard.live_copy(id) {
            Some(copy) if from.contains(&copy.status) => {
                copy.status = to;
                copy.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_copies(
        &self,
        tx: &mut Self::Tx,
        filter: &CopyFilter,
        page: &Pagination,
    ) -> AppResult<Vec<BookCopy>> {
        let matching = tx
            .guard
            .copies
            .values()
            .filter(|row| !row.deleted)
            .map(|row| &row.value)
            .filter(|c| filter.book_id.map_or(true, |id| c.book_id == id))
            .filter(|c| filter.status.map_or(true, |s| c.status == s))
            .cloned();
        Ok(page_of(matching, page))
    }

    async fn count_copies_by_status(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
    ) -> AppResult<Vec<(CopyStatus, i64)>> {
        let mut counts: HashMap<CopyStatus, i64> = HashMap::new();
        for row in tx.guard.copies.values() {
            if !row.deleted && row.value.book_id == book_id {
                *counts.entry(row.value.status).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    async fn soft_delete_copy(&self, tx: &mut Self::Tx, id: i64) -> AppResult<bool> {
        match tx.guard.copies.get_mut(&id) {
            Some(row) if !row.deleted && row.value.status != CopyStatus::Loaned => {
                row.deleted = true;
                row.value.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    async fn insert_loan(&self, tx: &mut Self::Tx, loan: &NewLoan) -> AppResult<Loan> {
        #[cfg(test)]
        if self.fail_loan_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Internal("loan insert failed".to_string()));
        }

        let state = &mut *tx.guard;
        if !state.members.contains_key(&loan.member_id) {
            return Err(AppError::not_found("member"));
        }
        if state.live_copy(loan.copy_id).is_none() {
            return Err(AppError::not_found("copy"));
        }
        let open_on_copy = state
            .loans
            .iter()
            .any(|row| !row.deleted && row.value.copy_id == loan.copy_id && row.value.status.is_open());
        if open_on_copy {
            return Err(AppError::duplicate("loan"));
        }

        let now = Utc::now();
        let created = Loan {
            id: Uuid::new_v4(),
            member_id: loan.member_id,
            copy_id: loan.copy_id,
            loan_date: loan.loan_date,
            due_date: loan.due_date,
            return_date: None,
            status: LoanStatus::Active,
            created_at: now,
            updated_at: now,
        };
        state.loans.push(Row::live(created.clone()));
        Ok(created)
    }

    async fn find_loan(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Loan>> {
        Ok(tx.guard.live_loan(id).map(|loan| loan.clone()))
    }

    async fn lock_loan(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Loan>> {
        self.find_loan(tx, id).await
    }

    async fn update_loan_status(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        transition: LoanTransition,
    ) -> AppResult<Option<Loan>> {
        Ok(tx.guard.live_loan(id).map(|loan| {
            loan.status = transition.status;
            if transition.return_date.is_some() {
                loan.return_date = transition.return_date;
            }
            loan.updated_at = Utc::now();
            loan.clone()
        }))
    }

    async fn soft_delete_loan(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool> {
        match tx.guard.loans.iter_mut().find(|row| !row.deleted && row.value.id == id) {
            Some(row) => {
                row.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_loans(&self, tx: &mut Self::Tx, page: &Pagination) -> AppResult<Vec<Loan>> {
        let live = tx
            .guard
            .loans
            .iter()
            .filter(|row| !row.deleted)
            .map(|row| row.value.clone());
        Ok(page_of(live, page))
    }

    async fn flag_overdue_loans(&self, tx: &mut Self::Tx, now: DateTime<Utc>) -> AppResult<u64> {
        let mut flagged = 0;
        for row in tx.guard.loans.iter_mut().filter(|row| !row.deleted) {
            if row.value.status == LoanStatus::Active && row.value.due_date < now {
                row.value.status = LoanStatus::Overdue;
                row.value.updated_at = now;
                flagged += 1;
            }
        }
        Ok(flagged)
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert_reservation(
        &self,
        tx: &mut Self::Tx,
        reservation: &NewReservation,
    ) -> AppResult<Reservation> {
        let state = &mut *tx.guard;
        if !state.books.contains(&reservation.book_id) {
            return Err(AppError::not_found("book"));
        }
        if !state.members.contains_key(&reservation.member_id) {
            return Err(AppError::not_found("member"));
        }
        if state
            .pending(reservation.book_id)
            .any(|r| r.member_id == reservation.member_id)
        {
            return Err(AppError::duplicate("reservation"));
        }

        let now = Utc::now();
        let created = Reservation {
            id: Uuid::new_v4(),
            book_id: reservation.book_id,
            member_id: reservation.member_id,
            reservation_date: reservation.reservation_date,
            status: ReservationStatus::Pending,
            queue_position: reservation.queue_position,
            created_at: now,
            updated_at: now,
        };
        state.reservations.push(Row::live(created.clone()));
        Ok(created)
    }

    async fn find_reservation(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<Option<Reservation>> {
        Ok(tx.guard.live_reservation(id).map(|r| r.clone()))
    }

    async fn last_queue_position(&self, tx: &mut Self::Tx, book_id: Uuid) -> AppResult<i32> {
        Ok(tx
            .guard
            .pending(book_id)
            .map(|r| r.queue_position)
            .max()
            .unwrap_or(0))
    }

    async fn pending_for_member(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
        member_id: Uuid,
    ) -> AppResult<Option<Reservation>> {
        Ok(tx
            .guard
            .pending(book_id)
            .find(|r| r.member_id == member_id)
            .cloned())
    }

    async fn set_reservation_status(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        status: ReservationStatus,
    ) -> AppResult<Option<Reservation>> {
        Ok(tx.guard.live_reservation(id).map(|r| {
            r.status = status;
            r.updated_at = Utc::now();
            r.clone()
        }))
    }

    async fn compact_queue(
        &self,
        tx: &mut Self::Tx,
        book_id: Uuid,
        after_position: i32,
    ) -> AppResult<u64> {
        let mut moved = 0;
        for row in tx.guard.reservations.iter_mut().filter(|row| !row.deleted) {
            let r = &mut row.value;
            if r.book_id == book_id
                && r.status == ReservationStatus::Pending
                && r.queue_position > after_position
            {
                r.queue_position -= 1;
                r.updated_at = Utc::now();
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn soft_delete_reservation(&self, tx: &mut Self::Tx, id: Uuid) -> AppResult<bool> {
        match tx
            .guard
            .reservations
            .iter_mut()
            .find(|row| !row.deleted && row.value.id == id)
        {
            Some(row) => {
                row.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_reservations(
        &self,
        tx: &mut Self::Tx,
        page: &Pagination,
    ) -> AppResult<Vec<Reservation>> {
        let live = tx
            .guard
            .reservations
            .iter()
            .filter(|row| !row.deleted)
            .map(|row| row.value.clone());
        Ok(page_of(live, page))
    }

    async fn queue_for_book(&self, tx: &mut Self::Tx, book_id: Uuid) -> AppResult<Vec<Reservation>> {
        let mut queue: Vec<Reservation> = tx.guard.pending(book_id).cloned().collect();
        queue.sort_by_key(|r| r.queue_position);
        Ok(queue)
    }
}
