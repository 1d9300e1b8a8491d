//! Loan management service

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    models::{
        loan::LoanTransition, CopyStatus, Loan, LoanStatus, NewLoan, Pagination,
        ReservationStatus,
    },
    repository::Store,
};

use super::reservations::{held_and_waiting, leave_queue};

/// Where a copy goes when its loan closes, given how many copies of the
/// book are already held and how many reservations are pending
fn copy_status_on_return(
    requested: Option<CopyStatus>,
    held: i64,
    waiting: i64,
) -> AppResult<CopyStatus> {
    match requested {
        Some(status) if status.is_out_of_circulation() => Ok(status),
        Some(CopyStatus::Loaned) => Err(AppError::bad_request("copy status invalid")),
        // available/reserved are routed from the queue, whatever the caller asked for
        _ => Ok(if held < waiting {
            CopyStatus::Reserved
        } else {
            CopyStatus::Available
        }),
    }
}

fn parse_loan_status(token: &str) -> AppResult<LoanStatus> {
    match token.trim().parse::<LoanStatus>() {
        Ok(status @ (LoanStatus::Returned | LoanStatus::Overdue)) => Ok(status),
        _ => Err(AppError::bad_request("status invalid")),
    }
}

fn parse_copy_status(token: Option<&str>) -> AppResult<Option<CopyStatus>> {
    match token.map(str::trim) {
        None | Some("") => Ok(None),
        Some(token) => token
            .parse()
            .map(Some)
            .map_err(|_| AppError::bad_request("copy status invalid")),
    }
}

#[derive(Clone)]
pub struct LoansService<S> {
    store: S,
    loan_period: Duration,
}

impl<S: Store> LoansService<S> {
    pub fn new(store: S, loan_period_days: i64) -> Self {
        Self {
            store,
            loan_period: Duration::days(loan_period_days),
        }
    }

    /// Lend a copy to a member.
    ///
    /// Member check, copy transition, loan insert and reservation
    /// fulfilment commit together or not at all.
    pub async fn create_loan(
        &self,
        ctx: &RequestContext,
        member_id: Uuid,
        copy_id: i64,
    ) -> AppResult<Loan> {
        tracing::info!(trace_id = %ctx.trace_id, %member_id, copy_id, "Create loan");

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

        let copy = self
            .store
            .find_copy(&mut tx, copy_id)
            .await?
            .ok_or_else(|| AppError::not_found("copy"))?;

        // Queue reads below must not race with reservation changes
        self.store.lock_book(&mut tx, copy.book_id).await?;
        let reservation = self
            .store
            .pending_for_member(&mut tx, copy.book_id, member_id)
            .await?;

        // Held copies go to the head of the queue, one per waiting member
        let may_take_held = match &reservation {
            Some(r) => {
                let (held, _) = held_and_waiting(&self.store, &mut tx, copy.book_id).await?;
                i64::from(r.queue_position) <= held
            }
            None => false,
        };
        let from: &[CopyStatus] = if may_take_held {
            &[CopyStatus::Available, CopyStatus::Reserved]
        } else {
            &[CopyStatus::Available]
        };
        if !self
            .store
            .transition_copy(&mut tx, copy_id, from, CopyStatus::Loaned)
            .await?
        {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                copy_id,
                status = %copy.status,
                "Copy is not available for this member"
            );
            return Err(AppError::bad_request("copy unavailable"));
        }

        let now = Utc::now();
        let loan = self
            .store
            .insert_loan(
                &mut tx,
                &NewLoan {
                    member_id,
                    copy_id,
                    loan_date: now,
                    due_date: now + self.loan_period,
                },
            )
            .await?;

        if let Some(reservation) = reservation {
            leave_queue(&self.store, &mut tx, &reservation, ReservationStatus::Fulfilled).await?;
            tracing::info!(
                trace_id = %ctx.trace_id,
                reservation_id = %reservation.id,
                "Reservation fulfilled by loan"
            );
        }

        self.store.commit(tx).await?;

        tracing::info!(
            trace_id = %ctx.trace_id,
            loan_id = %loan.id,
            due_date = %loan.due_date,
            "Loan created"
        );
        Ok(loan)
    }

    /// Close a loan as returned or flag it overdue, moving the copy accordingly
    pub async fn update_loan(
        &self,
        ctx: &RequestContext,
        loan_id: Uuid,
        status_token: &str,
        copy_id: Option<i64>,
        copy_status_token: Option<&str>,
    ) -> AppResult<Loan> {
        let status = parse_loan_status(status_token)?;
        let requested_copy_status = parse_copy_status(copy_status_token)?;

        let mut tx = self.store.begin().await?;

        let loan = self
            .store
            .lock_loan(&mut tx, loan_id)
            .await?
            .ok_or_else(|| AppError::not_found("loan"))?;
        if !loan.status.is_open() {
            return Err(AppError::bad_request("loan already returned"));
        }
        if copy_id.is_some_and(|id| id != loan.copy_id) {
            return Err(AppError::bad_request("copy mismatch"));
        }

        let updated = match status {
            LoanStatus::Returned => {
                let copy = self
                    .store
                    .find_copy(&mut tx, loan.copy_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("copy"))?;
                self.store.lock_book(&mut tx, copy.book_id).await?;
                let (held, waiting) = held_and_waiting(&self.store, &mut tx, copy.book_id).await?;
                let target = copy_status_on_return(requested_copy_status, held, waiting)?;

                let updated = self
                    .store
                    .update_loan_status(
                        &mut tx,
                        loan_id,
                        LoanTransition {
                            status: LoanStatus::Returned,
                            return_date: Some(Utc::now()),
                        },
                    )
                    .await?
                    .ok_or_else(|| AppError::not_found("loan"))?;
                self.store
                    .write_copy_status(&mut tx, loan.copy_id, target)
                    .await?
                    .ok_or_else(|| AppError::not_found("copy"))?;

                tracing::info!(
                    trace_id = %ctx.trace_id,
                    %loan_id,
                    copy_id = loan.copy_id,
                    copy_status = %target,
                    "Loan returned"
                );
                updated
            }
            _ => {
                if requested_copy_status.is_some_and(|s| s != CopyStatus::Loaned) {
                    return Err(AppError::bad_request("copy status invalid"));
                }
                let updated = self
                    .store
                    .update_loan_status(
                        &mut tx,
                        loan_id,
                        LoanTransition {
                            status: LoanStatus::Overdue,
                            return_date: None,
                        },
                    )
                    .await?
                    .ok_or_else(|| AppError::not_found("loan"))?;

                tracing::info!(trace_id = %ctx.trace_id, %loan_id, "Loan flagged overdue");
                updated
            }
        };

        self.store.commit(tx).await?;
        Ok(updated)
    }

    /// Soft delete of a closed loan
    pub async fn delete_loan(&self, ctx: &RequestContext, loan_id: Uuid) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        let loan = self
            .store
            .lock_loan(&mut tx, loan_id)
            .await?
            .ok_or_else(|| AppError::not_found("loan"))?;

        if loan.status.is_open() {
            tracing::warn!(trace_id = %ctx.trace_id, %loan_id, "Refused to delete an open loan");
            return Err(AppError::bad_request("loan still open"));
        }

        self.store.soft_delete_loan(&mut tx, loan_id).await?;
        self.store.commit(tx).await?;

        tracing::info!(trace_id = %ctx.trace_id, %loan_id, "Loan deleted");
        Ok(())
    }

    pub async fn get_loan_by_id(&self, ctx: &RequestContext, loan_id: Uuid) -> AppResult<Loan> {
        let mut tx = self.store.begin().await?;
        let loan = self.store.find_loan(&mut tx, loan_id).await?;
        self.store.commit(tx).await?;

        loan.ok_or_else(|| {
            tracing::debug!(trace_id = %ctx.trace_id, %loan_id, "Loan not found");
            AppError::not_found("loan")
        })
    }

    pub async fn get_all_loans(&self, ctx: &RequestContext, page: &Pagination) -> AppResult<Vec<Loan>> {
        let mut tx = self.store.begin().await?;
        let loans = self.store.list_loans(&mut tx, page).await?;
        self.store.commit(tx).await?;

        tracing::debug!(trace_id = %ctx.trace_id, "Fetched {} loans", loans.len());
        Ok(loans)
    }

    /// Flag every active loan past its due date as overdue
    pub async fn flag_overdue(&self, ctx: &RequestContext) -> AppResult<u64> {
        let mut tx = self.store.begin().await?;
        let flagged = self.store.flag_overdue_loans(&mut tx, Utc::now()).await?;
        self.store.commit(tx).await?;

        if flagged > 0 {
            tracing::info!(trace_id = %ctx.trace_id, "Flagged {} loans overdue", flagged);
        }
        Ok(flagged)
    }
}
