//! Business logic services

pub mod copies;
pub mod loans;
pub mod reservations;

use std::{sync::Arc, time::Duration};

use crate::{
    config::CirculationConfig, context::RequestContext, error::AppResult, repository::Store,
};

/// Container for all services
#[derive(Clone)]
pub struct Services<S> {
    pub copies: copies::CopiesService<S>,
    pub loans: loans::LoansService<S>,
    pub reservations: reservations::ReservationsService<S>,
    store: S,
}

impl<S: Store> Services<S> {
    /// Create all services over the given store
    pub fn new(store: S, config: &CirculationConfig) -> Self {
        Self {
            copies: copies::CopiesService::new(store.clone(), config.max_batch_size),
            loans: loans::LoansService::new(store.clone(), config.loan_period_days),
            reservations: reservations::ReservationsService::new(store.clone()),
            store,
        }
    }

    /// Open and commit an empty transaction to prove the store is reachable
    pub async fn check_ready(&self) -> AppResult<()> {
        let tx = self.store.begin().await?;
        self.store.commit(tx).await
    }
}

/// Run the overdue sweep every `period` until the runtime shuts down
pub fn spawn_overdue_sweep<S: Store>(
    services: Arc<Services<S>>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let ctx = RequestContext::generate();
            if let Err(e) = services.loans.flag_overdue(&ctx).await {
                tracing::error!(trace_id = %ctx.trace_id, "Overdue sweep failed: {}", e);
            }
        }
    })
}
