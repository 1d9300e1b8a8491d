//! Copy ledger service
//!
//! Stores and reports copy availability. Status writes here are
//! unconditional; loan and reservation workflows decide which transitions
//! are legal before calling into the ledger.

use uuid::Uuid;

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    models::{Availability, BookCopy, CopyFilter, CopyStatus, Pagination},
    repository::Store,
};

#[derive(Clone)]
pub struct CopiesService<S> {
    store: S,
    max_batch_size: u32,
}

impl<S: Store> CopiesService<S> {
    pub fn new(store: S, max_batch_size: u32) -> Self {
        Self {
            store,
            max_batch_size,
        }
    }

    /// Create `count` copies of a book in one unit
    pub async fn create_batch(
        &self,
        ctx: &RequestContext,
        book_id: Uuid,
        initial_status: CopyStatus,
        count: u32,
    ) -> AppResult<Vec<BookCopy>> {
        if count == 0 || count > self.max_batch_size {
            tracing::warn!(trace_id = %ctx.trace_id, %book_id, count, "Rejected copy batch size");
            return Err(AppError::bad_request("copy count invalid"));
        }

        let mut tx = self.store.begin().await?;
        if !self.store.lock_book(&mut tx, book_id).await? {
            return Err(AppError::not_found("book"));
        }
        let copies = self
            .store
            .insert_copies(&mut tx, book_id, initial_status, count)
            .await?;
        self.store.commit(tx).await?;

        tracing::info!(
            trace_id = %ctx.trace_id,
            %book_id,
            status = %initial_status,
            "Created {} copies",
            copies.len()
        );
        Ok(copies)
    }

    pub async fn get_by_id(&self, ctx: &RequestContext, copy_id: i64) -> AppResult<BookCopy> {
        let mut tx = self.store.begin().await?;
        let copy = self.store.find_copy(&mut tx, copy_id).await?;
        self.store.commit(tx).await?;

        copy.ok_or_else(|| {
            tracing::debug!(trace_id = %ctx.trace_id, copy_id, "Copy not found");
            AppError::not_found("copy")
        })
    }

    /// Unconditional status write
    pub async fn set_status(
        &self,
        ctx: &RequestContext,
        copy_id: i64,
        status: CopyStatus,
    ) -> AppResult<BookCopy> {
        let mut tx = self.store.begin().await?;
        let copy = self
            .store
            .write_copy_status(&mut tx, copy_id, status)
            .await?
            .ok_or_else(|| AppError::not_found("copy"))?;
        self.store.commit(tx).await?;

        tracing::info!(trace_id = %ctx.trace_id, copy_id, %status, "Copy status written");
        Ok(copy)
    }

    pub async fn find_by_condition(
        &self,
        ctx: &RequestContext,
        filter: &CopyFilter,
        page: &Pagination,
    ) -> AppResult<Vec<BookCopy>> {
        let mut tx = self.store.begin().await?;
        let copies = self.store.find_copies(&mut tx, filter, page).await?;
        self.store.commit(tx).await?;

        tracing::debug!(trace_id = %ctx.trace_id, "Found {} copies", copies.len());
        Ok(copies)
    }

    /// Soft delete; a copy on loan stays until the loan is closed
    pub async fn delete_by_id(&self, ctx: &RequestContext, copy_id: i64) -> AppResult<()> {
        let mut tx = self.store.begin().await?;

        // Conditional write: loaned copies are never deleted
        if !self.store.soft_delete_copy(&mut tx, copy_id).await? {
            return match self.store.find_copy(&mut tx, copy_id).await? {
                Some(_) => {
                    tracing::warn!(trace_id = %ctx.trace_id, copy_id, "Refused to delete a loaned copy");
                    Err(AppError::bad_request("copy on loan"))
                }
                None => Err(AppError::not_found("copy")),
            };
        }
        self.store.commit(tx).await?;

        tracing::info!(trace_id = %ctx.trace_id, copy_id, "Copy deleted");
        Ok(())
    }

    pub async fn availability(&self, ctx: &RequestContext, book_id: Uuid) -> AppResult<Availability> {
        let mut tx = self.store.begin().await?;
        if !self.store.book_exists(&mut tx, book_id).await? {
            return Err(AppError::not_found("book"));
        }
        let counts = self.store.count_copies_by_status(&mut tx, book_id).await?;
        self.store.commit(tx).await?;

        let availability = Availability::from_counts(book_id, &counts);
        tracing::debug!(
            trace_id = %ctx.trace_id,
            %book_id,
            lendable = availability.lendable,
            "Computed availability"
        );
        Ok(availability)
    }
}
