//! Circulation workflow tests

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use circulation_server::{
    config::CirculationConfig,
    models::{AccountStatus, BookCopy, CopyFilter, CopyStatus, LoanStatus, Pagination, ReservationStatus},
    repository::memory::MemoryStore,
    services::Services,
    AppError, RequestContext,
};

struct Fixture {
    store: MemoryStore,
    services: Arc<Services<MemoryStore>>,
    ctx: RequestContext,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(CirculationConfig::default())
    }

    fn with_config(config: CirculationConfig) -> Self {
        let store = MemoryStore::new();
        let services = Arc::new(Services::new(store.clone(), &config));
        Self {
            store,
            services,
            ctx: RequestContext::new("test-trace"),
        }
    }

    async fn active_member(&self) -> Uuid {
        self.store.add_member(AccountStatus::Active).await.id
    }

    async fn book_with_copies(&self, count: u32) -> (Uuid, Vec<BookCopy>) {
        let book_id = self.store.add_book().await;
        let copies = self
            .services
            .copies
            .create_batch(&self.ctx, book_id, CopyStatus::Available, count)
            .await
            .unwrap();
        (book_id, copies)
    }

    async fn queue_positions(&self, book_id: Uuid) -> Vec<i32> {
        self.services
            .reservations
            .queue_for_book(&self.ctx, book_id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.queue_position)
            .collect()
    }

    /// A copy is loaned exactly when an open loan points at it
    async fn assert_copies_match_loans(&self) {
        let loans = self.store.loans().await;
        for copy in self.store.copies().await {
            let open = loans
                .iter()
                .filter(|l| l.copy_id == copy.id && l.status.is_open())
                .count();
            assert!(open <= 1, "copy {} has {} open loans", copy.id, open);
            assert_eq!(
                copy.status == CopyStatus::Loaned,
                open == 1,
                "copy {} is {} with {} open loans",
                copy.id,
                copy.status,
                open
            );
        }
    }
}

fn assert_contiguous(positions: &[i32]) {
    let expected: Vec<i32> = (1..=positions.len() as i32).collect();
    assert_eq!(positions, expected.as_slice());
}

// ---------------------------------------------------------------------------
// Copy ledger
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_batch_creates_all_copies() {
    let fx = Fixture::new();
    let (book_id, copies) = fx.book_with_copies(3).await;

    assert_eq!(copies.len(), 3);
    assert!(copies.iter().all(|c| c.book_id == book_id && c.status == CopyStatus::Available));

    let availability = fx.services.copies.availability(&fx.ctx, book_id).await.unwrap();
    assert_eq!(availability.total, 3);
    assert_eq!(availability.lendable, 3);
}

#[tokio::test]
async fn test_create_batch_rejects_bad_input() {
    let fx = Fixture::new();
    let book_id = fx.store.add_book().await;

    let err = fx
        .services
        .copies
        .create_batch(&fx.ctx, book_id, CopyStatus::Available, 0)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("copy count invalid"));

    let err = fx
        .services
        .copies
        .create_batch(&fx.ctx, Uuid::new_v4(), CopyStatus::Available, 2)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::not_found("book"));
    assert!(fx.store.copies().await.is_empty());
}

#[tokio::test]
async fn test_get_by_id_is_idempotent() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(1).await;

    let first = fx.services.copies.get_by_id(&fx.ctx, copies[0].id).await.unwrap();
    let second = fx.services.copies.get_by_id(&fx.ctx, copies[0].id).await.unwrap();
    assert_eq!(first, second);

    let err = fx.services.copies.get_by_id(&fx.ctx, 9999).await.unwrap_err();
    assert_eq!(err, AppError::not_found("copy"));
}

#[tokio::test]
async fn test_find_by_condition_filters_and_pages() {
    let fx = Fixture::new();
    let (book_id, copies) = fx.book_with_copies(4).await;
    let (_, _) = fx.book_with_copies(2).await;
    fx.services
        .copies
        .set_status(&fx.ctx, copies[1].id, CopyStatus::Damaged)
        .await
        .unwrap();

    let filter = CopyFilter {
        book_id: Some(book_id),
        status: Some(CopyStatus::Available),
    };
    let found = fx
        .services
        .copies
        .find_by_condition(&fx.ctx, &filter, &Pagination::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 3);

    let second_page = fx
        .services
        .copies
        .find_by_condition(&fx.ctx, &CopyFilter::default(), &Pagination::new(2, 4))
        .await
        .unwrap();
    assert_eq!(second_page.len(), 2);

    let availability = fx.services.copies.availability(&fx.ctx, book_id).await.unwrap();
    assert_eq!(availability.damaged, 1);
    assert_eq!(availability.lendable, 3);
}

#[tokio::test]
async fn test_loaned_copy_cannot_be_deleted() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(2).await;
    let member = fx.active_member().await;
    fx.services.loans.create_loan(&fx.ctx, member, copies[0].id).await.unwrap();

    let err = fx.services.copies.delete_by_id(&fx.ctx, copies[0].id).await.unwrap_err();
    assert_eq!(err, AppError::bad_request("copy on loan"));

    fx.services.copies.delete_by_id(&fx.ctx, copies[1].id).await.unwrap();
    let err = fx.services.copies.get_by_id(&fx.ctx, copies[1].id).await.unwrap_err();
    assert_eq!(err, AppError::not_found("copy"));

    let err = fx.services.copies.delete_by_id(&fx.ctx, copies[1].id).await.unwrap_err();
    assert_eq!(err, AppError::not_found("copy"));
    let copy = fx.services.copies.get_by_id(&fx.ctx, copies[0].id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Loaned);
    fx.assert_copies_match_loans().await;
}

// ---------------------------------------------------------------------------
// Loans
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_loan_marks_copy_loaned() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(1).await;
    let member = fx.active_member().await;

    let loan = fx.services.loans.create_loan(&fx.ctx, member, copies[0].id).await.unwrap();

    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.member_id, member);
    assert_eq!(loan.due_date - loan.loan_date, Duration::days(7));
    assert!(loan.return_date.is_none());

    let copy = fx.services.copies.get_by_id(&fx.ctx, copies[0].id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Loaned);
}

#[tokio::test]
async fn test_second_loan_on_same_copy_fails() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(1).await;
    let member = fx.active_member().await;

    fx.services.loans.create_loan(&fx.ctx, member, copies[0].id).await.unwrap();
    let err = fx
        .services
        .loans
        .create_loan(&fx.ctx, member, copies[0].id)
        .await
        .unwrap_err();

    assert_eq!(err, AppError::bad_request("copy unavailable"));
    assert_eq!(fx.store.loans().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loans_only_one_wins() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(1).await;
    let copy_id = copies[0].id;

    let mut handles = Vec::new();
    for i in 0..16 {
        let member = fx.active_member().await;
        let services = fx.services.clone();
        handles.push(tokio::spawn(async move {
            let ctx = RequestContext::new(format!("racer-{}", i));
            services.loans.create_loan(&ctx, member, copy_id).await
        }));
    }

    let mut won = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(err) => {
                assert_eq!(err, AppError::bad_request("copy unavailable"));
                lost += 1;
            }
        }
    }

    assert_eq!(won, 1);
    assert_eq!(lost, 15);
    assert_eq!(fx.store.loans().await.len(), 1);
    fx.assert_copies_match_loans().await;
}

#[tokio::test]
async fn test_suspended_member_cannot_borrow_or_reserve() {
    let fx = Fixture::new();
    let (book_id, copies) = fx.book_with_copies(1).await;
    let member = fx.store.add_member(AccountStatus::Suspended).await.id;

    let err = fx
        .services
        .loans
        .create_loan(&fx.ctx, member, copies[0].id)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("account suspended"));

    let err = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, book_id, member)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("account suspended"));

    assert!(fx.store.loans().await.is_empty());
    assert!(fx.store.reservations().await.is_empty());
    let copy = fx.services.copies.get_by_id(&fx.ctx, copies[0].id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Available);
}

#[tokio::test]
async fn test_suspension_wins_over_unavailable_copy() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(1).await;
    let borrower = fx.active_member().await;
    fx.services.loans.create_loan(&fx.ctx, borrower, copies[0].id).await.unwrap();

    let member = fx.active_member().await;
    fx.store.set_account_status(member, AccountStatus::Suspended).await;
    let err = fx
        .services
        .loans
        .create_loan(&fx.ctx, member, copies[0].id)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("account suspended"));
}

#[tokio::test]
async fn test_unknown_member_or_copy() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(1).await;
    let member = fx.active_member().await;

    let err = fx
        .services
        .loans
        .create_loan(&fx.ctx, Uuid::new_v4(), copies[0].id)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::not_found("member"));

    let err = fx.services.loans.create_loan(&fx.ctx, member, 4242).await.unwrap_err();
    assert_eq!(err, AppError::not_found("copy"));
}

#[tokio::test]
async fn test_return_frees_copy() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(1).await;
    let member = fx.active_member().await;
    let loan = fx.services.loans.create_loan(&fx.ctx, member, copies[0].id).await.unwrap();

    let returned = fx
        .services
        .loans
        .update_loan(&fx.ctx, loan.id, "Returned", Some(copies[0].id), None)
        .await
        .unwrap();

    assert_eq!(returned.status, LoanStatus::Returned);
    assert!(returned.return_date.is_some());
    let copy = fx.services.copies.get_by_id(&fx.ctx, copies[0].id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Available);

    let err = fx
        .services
        .loans
        .update_loan(&fx.ctx, loan.id, "returned", None, None)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("loan already returned"));
    fx.assert_copies_match_loans().await;
}

#[tokio::test]
async fn test_update_loan_validation() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(2).await;
    let member = fx.active_member().await;
    let loan = fx.services.loans.create_loan(&fx.ctx, member, copies[0].id).await.unwrap();

    let err = fx
        .services
        .loans
        .update_loan(&fx.ctx, loan.id, "active", None, None)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("status invalid"));

    let err = fx
        .services
        .loans
        .update_loan(&fx.ctx, loan.id, "returned", Some(copies[1].id), None)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("copy mismatch"));

    let err = fx
        .services
        .loans
        .update_loan(&fx.ctx, loan.id, "returned", None, Some("loaned"))
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("copy status invalid"));

    let err = fx
        .services
        .loans
        .update_loan(&fx.ctx, Uuid::new_v4(), "returned", None, None)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::not_found("loan"));

    // Nothing above may have touched the loan or its copy
    let unchanged = fx.services.loans.get_loan_by_id(&fx.ctx, loan.id).await.unwrap();
    assert_eq!(unchanged.status, LoanStatus::Active);
    fx.assert_copies_match_loans().await;
}

#[tokio::test]
async fn test_overdue_keeps_copy_loaned() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(1).await;
    let member = fx.active_member().await;
    let loan = fx.services.loans.create_loan(&fx.ctx, member, copies[0].id).await.unwrap();

    let overdue = fx
        .services
        .loans
        .update_loan(&fx.ctx, loan.id, "overdue", None, None)
        .await
        .unwrap();
    assert_eq!(overdue.status, LoanStatus::Overdue);

    let copy = fx.services.copies.get_by_id(&fx.ctx, copies[0].id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Loaned);

    // An overdue loan can still be returned, here with a damaged copy
    fx.services
        .loans
        .update_loan(&fx.ctx, loan.id, "returned", None, Some("damaged"))
        .await
        .unwrap();
    let copy = fx.services.copies.get_by_id(&fx.ctx, copies[0].id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Damaged);
    fx.assert_copies_match_loans().await;
}

#[tokio::test]
async fn test_delete_loan_only_when_closed() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(1).await;
    let member = fx.active_member().await;
    let loan = fx.services.loans.create_loan(&fx.ctx, member, copies[0].id).await.unwrap();

    let err = fx.services.loans.delete_loan(&fx.ctx, loan.id).await.unwrap_err();
    assert_eq!(err, AppError::bad_request("loan still open"));

    fx.services
        .loans
        .update_loan(&fx.ctx, loan.id, "returned", None, None)
        .await
        .unwrap();
    fx.services.loans.delete_loan(&fx.ctx, loan.id).await.unwrap();

    let err = fx.services.loans.get_loan_by_id(&fx.ctx, loan.id).await.unwrap_err();
    assert_eq!(err, AppError::not_found("loan"));
    let err = fx.services.loans.delete_loan(&fx.ctx, loan.id).await.unwrap_err();
    assert_eq!(err, AppError::not_found("loan"));
}

#[tokio::test]
async fn test_get_all_loans_pages() {
    let fx = Fixture::new();
    let (_, copies) = fx.book_with_copies(5).await;
    for copy in &copies {
        let member = fx.active_member().await;
        fx.services.loans.create_loan(&fx.ctx, member, copy.id).await.unwrap();
    }

    let first = fx
        .services
        .loans
        .get_all_loans(&fx.ctx, &Pagination::new(1, 2))
        .await
        .unwrap();
    let last = fx
        .services
        .loans
        .get_all_loans(&fx.ctx, &Pagination::new(3, 2))
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].copy_id, copies[4].id);
}

#[tokio::test]
async fn test_flag_overdue_sweeps_past_due_loans() {
    let fx = Fixture::with_config(CirculationConfig {
        loan_period_days: -1,
        ..CirculationConfig::default()
    });
    let (_, copies) = fx.book_with_copies(2).await;
    let member = fx.active_member().await;
    let loan = fx.services.loans.create_loan(&fx.ctx, member, copies[0].id).await.unwrap();

    assert_eq!(fx.services.loans.flag_overdue(&fx.ctx).await.unwrap(), 1);
    assert_eq!(fx.services.loans.flag_overdue(&fx.ctx).await.unwrap(), 0);

    let loan = fx.services.loans.get_loan_by_id(&fx.ctx, loan.id).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Overdue);
    fx.assert_copies_match_loans().await;
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reservations_append_to_queue() {
    let fx = Fixture::new();
    let book_id = fx.store.add_book().await;

    for expected in 1..=3 {
        let member = fx.active_member().await;
        let reservation = fx
            .services
            .reservations
            .create_reservation(&fx.ctx, book_id, member)
            .await
            .unwrap();
        assert_eq!(reservation.queue_position, expected);
        assert_eq!(reservation.status, ReservationStatus::Pending);
    }
    assert_eq!(fx.queue_positions(book_id).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_cancel_middle_of_queue_renumbers() {
    let fx = Fixture::new();
    let book_id = fx.store.add_book().await;
    let mut reservations = Vec::new();
    for _ in 0..3 {
        let member = fx.active_member().await;
        reservations.push(
            fx.services
                .reservations
                .create_reservation(&fx.ctx, book_id, member)
                .await
                .unwrap(),
        );
    }

    let cancelled = fx
        .services
        .reservations
        .update_reservation(&fx.ctx, reservations[1].id, Some("cancelled"))
        .await
        .unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);

    let queue = fx
        .services
        .reservations
        .queue_for_book(&fx.ctx, book_id)
        .await
        .unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].id, reservations[0].id);
    assert_eq!(queue[0].queue_position, 1);
    assert_eq!(queue[1].id, reservations[2].id);
    assert_eq!(queue[1].queue_position, 2);
}

#[tokio::test]
async fn test_delete_pending_reservation_compacts() {
    let fx = Fixture::new();
    let book_id = fx.store.add_book().await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let member = fx.active_member().await;
        let r = fx
            .services
            .reservations
            .create_reservation(&fx.ctx, book_id, member)
            .await
            .unwrap();
        ids.push(r.id);
    }

    fx.services.reservations.delete_reservation(&fx.ctx, ids[0]).await.unwrap();
    assert_eq!(fx.queue_positions(book_id).await, vec![1, 2]);

    let err = fx
        .services
        .reservations
        .get_reservation_by_id(&fx.ctx, ids[0])
        .await
        .unwrap_err();
    assert_eq!(err, AppError::not_found("reservation"));

    let head = fx
        .services
        .reservations
        .get_reservation_by_id(&fx.ctx, ids[1])
        .await
        .unwrap();
    assert_eq!(head.queue_position, 1);
}

#[tokio::test]
async fn test_reservation_rules() {
    let fx = Fixture::new();
    let book_id = fx.store.add_book().await;
    let member = fx.active_member().await;
    let reservation = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, book_id, member)
        .await
        .unwrap();

    let err = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, book_id, member)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::duplicate("reservation"));

    let err = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, Uuid::new_v4(), member)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::not_found("book"));

    let err = fx
        .services
        .reservations
        .update_reservation(&fx.ctx, reservation.id, Some("waiting"))
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("status invalid"));

    // Blank token and same status only touch the row
    let touched = fx
        .services
        .reservations
        .update_reservation(&fx.ctx, reservation.id, None)
        .await
        .unwrap();
    assert_eq!(touched.status, ReservationStatus::Pending);
    assert!(touched.updated_at >= reservation.updated_at);
    fx.services
        .reservations
        .update_reservation(&fx.ctx, reservation.id, Some("PENDING"))
        .await
        .unwrap();

    fx.services
        .reservations
        .update_reservation(&fx.ctx, reservation.id, Some("cancelled"))
        .await
        .unwrap();
    let err = fx
        .services
        .reservations
        .update_reservation(&fx.ctx, reservation.id, Some("pending"))
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("reservation closed"));

    // Once out of the queue the member may reserve again
    let again = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, book_id, member)
        .await
        .unwrap();
    assert_eq!(again.queue_position, 1);
}

#[tokio::test]
async fn test_queue_stays_contiguous_after_mixed_operations() {
    let fx = Fixture::new();
    let book_id = fx.store.add_book().await;
    let mut ids = Vec::new();
    for _ in 0..6 {
        let member = fx.active_member().await;
        let r = fx
            .services
            .reservations
            .create_reservation(&fx.ctx, book_id, member)
            .await
            .unwrap();
        ids.push(r.id);
    }

    fx.services
        .reservations
        .update_reservation(&fx.ctx, ids[2], Some("fulfilled"))
        .await
        .unwrap();
    assert_contiguous(&fx.queue_positions(book_id).await);

    fx.services.reservations.delete_reservation(&fx.ctx, ids[5]).await.unwrap();
    assert_contiguous(&fx.queue_positions(book_id).await);

    let member = fx.active_member().await;
    let late = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, book_id, member)
        .await
        .unwrap();
    assert_eq!(late.queue_position, 5);

    fx.services
        .reservations
        .update_reservation(&fx.ctx, ids[0], Some("cancelled"))
        .await
        .unwrap();
    fx.services.reservations.delete_reservation(&fx.ctx, ids[2]).await.unwrap();
    let positions = fx.queue_positions(book_id).await;
    assert_eq!(positions.len(), 4);
    assert_contiguous(&positions);
}

#[tokio::test]
async fn test_return_routes_copy_to_waiting_member() {
    let fx = Fixture::new();
    let (book_id, copies) = fx.book_with_copies(1).await;
    let copy_id = copies[0].id;
    let first = fx.active_member().await;
    let waiting = fx.active_member().await;
    let other = fx.active_member().await;

    let loan = fx.services.loans.create_loan(&fx.ctx, first, copy_id).await.unwrap();
    let reservation = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, book_id, waiting)
        .await
        .unwrap();

    // The caller asking for available still routes to the queue
    fx.services
        .loans
        .update_loan(&fx.ctx, loan.id, "returned", None, Some("available"))
        .await
        .unwrap();
    let copy = fx.services.copies.get_by_id(&fx.ctx, copy_id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Reserved);

    let err = fx.services.loans.create_loan(&fx.ctx, other, copy_id).await.unwrap_err();
    assert_eq!(err, AppError::bad_request("copy unavailable"));

    let loan = fx.services.loans.create_loan(&fx.ctx, waiting, copy_id).await.unwrap();
    assert_eq!(loan.member_id, waiting);

    let fulfilled = fx
        .services
        .reservations
        .get_reservation_by_id(&fx.ctx, reservation.id)
        .await
        .unwrap();
    assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);
    assert!(fx.queue_positions(book_id).await.is_empty());
    fx.assert_copies_match_loans().await;
}

#[tokio::test]
async fn test_borrowing_available_copy_fulfils_reservation() {
    let fx = Fixture::new();
    let (book_id, copies) = fx.book_with_copies(2).await;
    let ahead = fx.active_member().await;
    let member = fx.active_member().await;
    for m in [ahead, member] {
        fx.services
            .reservations
            .create_reservation(&fx.ctx, book_id, m)
            .await
            .unwrap();
    }

    fx.services.loans.create_loan(&fx.ctx, member, copies[0].id).await.unwrap();

    let queue = fx
        .services
        .reservations
        .queue_for_book(&fx.ctx, book_id)
        .await
        .unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].member_id, ahead);
    assert_eq!(queue[0].queue_position, 1);
}

/// Lend every copy of a fresh book to its own member
async fn lend_all(fx: &Fixture, copies: &[BookCopy]) -> Vec<Uuid> {
    let mut loan_ids = Vec::new();
    for copy in copies {
        let member = fx.active_member().await;
        let loan = fx.services.loans.create_loan(&fx.ctx, member, copy.id).await.unwrap();
        loan_ids.push(loan.id);
    }
    loan_ids
}

#[tokio::test]
async fn test_cancelled_reservation_releases_held_copy() {
    let fx = Fixture::new();
    let (book_id, copies) = fx.book_with_copies(1).await;
    let copy_id = copies[0].id;
    let loans = lend_all(&fx, &copies).await;
    let waiting = fx.active_member().await;
    let reservation = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, book_id, waiting)
        .await
        .unwrap();

    fx.services
        .loans
        .update_loan(&fx.ctx, loans[0], "returned", None, None)
        .await
        .unwrap();
    let copy = fx.services.copies.get_by_id(&fx.ctx, copy_id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Reserved);

    fx.services
        .reservations
        .update_reservation(&fx.ctx, reservation.id, Some("cancelled"))
        .await
        .unwrap();
    let copy = fx.services.copies.get_by_id(&fx.ctx, copy_id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Available);

    let other = fx.active_member().await;
    fx.services.loans.create_loan(&fx.ctx, other, copy_id).await.unwrap();
    fx.assert_copies_match_loans().await;
}

#[tokio::test]
async fn test_deleted_reservation_releases_held_copy() {
    let fx = Fixture::new();
    let (book_id, copies) = fx.book_with_copies(1).await;
    let loans = lend_all(&fx, &copies).await;
    let waiting = fx.active_member().await;
    let reservation = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, book_id, waiting)
        .await
        .unwrap();
    fx.services
        .loans
        .update_loan(&fx.ctx, loans[0], "returned", None, None)
        .await
        .unwrap();

    fx.services
        .reservations
        .delete_reservation(&fx.ctx, reservation.id)
        .await
        .unwrap();

    let availability = fx.services.copies.availability(&fx.ctx, book_id).await.unwrap();
    assert_eq!(availability.reserved, 0);
    assert_eq!(availability.lendable, 1);
}

#[tokio::test]
async fn test_returns_hold_at_most_one_copy_per_waiter() {
    let fx = Fixture::new();
    let (book_id, copies) = fx.book_with_copies(2).await;
    let loans = lend_all(&fx, &copies).await;
    let waiting = fx.active_member().await;
    let reservation = fx
        .services
        .reservations
        .create_reservation(&fx.ctx, book_id, waiting)
        .await
        .unwrap();

    for loan_id in &loans {
        fx.services
            .loans
            .update_loan(&fx.ctx, *loan_id, "returned", None, None)
            .await
            .unwrap();
    }
    let first = fx.services.copies.get_by_id(&fx.ctx, copies[0].id).await.unwrap();
    let second = fx.services.copies.get_by_id(&fx.ctx, copies[1].id).await.unwrap();
    assert_eq!(first.status, CopyStatus::Reserved);
    assert_eq!(second.status, CopyStatus::Available);

    // Taking the shelf copy fulfils the reservation and frees the held one
    fx.services.loans.create_loan(&fx.ctx, waiting, copies[1].id).await.unwrap();
    let fulfilled = fx
        .services
        .reservations
        .get_reservation_by_id(&fx.ctx, reservation.id)
        .await
        .unwrap();
    assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);

    let availability = fx.services.copies.availability(&fx.ctx, book_id).await.unwrap();
    assert_eq!(availability.reserved, 0);
    assert_eq!(availability.loaned, 1);
    assert_eq!(availability.lendable, 1);
    fx.assert_copies_match_loans().await;
}

#[tokio::test]
async fn test_each_held_copy_serves_one_waiter() {
    let fx = Fixture::new();
    let (book_id, copies) = fx.book_with_copies(2).await;
    let loans = lend_all(&fx, &copies).await;
    let head = fx.active_member().await;
    let second = fx.active_member().await;
    for m in [head, second] {
        fx.services
            .reservations
            .create_reservation(&fx.ctx, book_id, m)
            .await
            .unwrap();
    }
    for loan_id in &loans {
        fx.services
            .loans
            .update_loan(&fx.ctx, *loan_id, "returned", None, None)
            .await
            .unwrap();
    }

    let availability = fx.services.copies.availability(&fx.ctx, book_id).await.unwrap();
    assert_eq!(availability.reserved, 2);

    // Two copies are held, so the second in line does not wait for the head
    fx.services.loans.create_loan(&fx.ctx, second, copies[1].id).await.unwrap();
    let queue = fx
        .services
        .reservations
        .queue_for_book(&fx.ctx, book_id)
        .await
        .unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].member_id, head);

    let outsider = fx.active_member().await;
    let err = fx
        .services
        .loans
        .create_loan(&fx.ctx, outsider, copies[0].id)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::bad_request("copy unavailable"));

    fx.services.loans.create_loan(&fx.ctx, head, copies[0].id).await.unwrap();
    assert!(fx.queue_positions(book_id).await.is_empty());
    fx.assert_copies_match_loans().await;
}

#[tokio::test]
async fn test_queue_for_unknown_book() {
    let fx = Fixture::new();
    let err = fx
        .services
        .reservations
        .queue_for_book(&fx.ctx, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err, AppError::not_found("book"));

    let err = fx
        .services
        .copies
        .availability(&fx.ctx, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err, AppError::not_found("book"));
}
