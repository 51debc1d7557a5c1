//! The reconciliation loop and the pass it runs on every tick.

use crate::audit::{AuditEvent, AuditLog};
use crate::dispatcher::{FulfillmentDispatcher, FulfillmentOutcome};
use crate::engine::{ConfirmationEngine, Evaluation, Evidence};
use crate::error::Result;
use crate::store::PaymentStore;
use chrono::{DateTime, Utc};
use ledger::Deposit;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tronpay_core::PaymentIntent;

/// Counts from one pass over the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub confirmed: usize,
    pub expired: usize,
    pub pending: usize,
    pub deferred: usize,
    /// Intent-scoped errors; the rest of the pass went ahead.
    pub failed: usize,
    pub fulfilled: usize,
    /// Confirmed intents picked up by the recovery sweep.
    pub resumed: usize,
}

pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    engine: Arc<ConfirmationEngine>,
    dispatcher: Arc<FulfillmentDispatcher>,
    audit: Arc<AuditLog>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        engine: Arc<ConfirmationEngine>,
        dispatcher: Arc<FulfillmentDispatcher>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            engine,
            dispatcher,
            audit,
        }
    }

    /// Steps every Pending intent once, oldest first, then sweeps for
    /// confirmed intents that were never claimed.
    ///
    /// A store failure aborts the pass; anything scoped to a single intent is
    /// logged and counted.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        for intent in self.store.list_pending()? {
            report.checked += 1;
            match self.engine.step(&intent, now).await {
                Ok(Evaluation::Confirmed(confirmed)) => {
                    report.confirmed += 1;
                    if self.fulfill(&confirmed).await? {
                        report.fulfilled += 1;
                    }
                }
                Ok(Evaluation::Expired(_)) => report.expired += 1,
                Ok(Evaluation::Pending { .. }) => report.pending += 1,
                Ok(Evaluation::Deferred { .. }) => report.deferred += 1,
                Ok(Evaluation::Unchanged(_)) => {}
                Err(e) if e.is_intent_scoped() => {
                    warn!(intent_id = %intent.id, error = %e, "Skipping intent this tick");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        report.resumed = self.resume_unfulfilled().await?;
        Ok(report)
    }

    /// Pushed-deposit entry point. Goes through the same transition as the
    /// polling pass; `None` when nothing holds `address`.
    pub async fn ingest_deposit(
        &self,
        address: &str,
        deposit: Deposit,
        now: DateTime<Utc>,
    ) -> Result<Option<Evaluation>> {
        let Some(intent) = self.store.get_active_by_address(address)? else {
            debug!(address = %address, tx_id = %deposit.tx_id, "Deposit for an address with no active lease");
            return Ok(None);
        };

        let evaluation = self
            .engine
            .evaluate_confirmation(&intent, Evidence::Transfer(deposit), now)
            .await?;
        if let Evaluation::Confirmed(confirmed) = &evaluation {
            self.fulfill(confirmed).await?;
        }
        Ok(Some(evaluation))
    }

    /// Dispatches Confirmed intents whose fulfillment was never claimed:
    /// a crash between confirmation and claim, or a confirmation made
    /// outside the loop. Flagged intents are left for a human.
    pub async fn resume_unfulfilled(&self) -> Result<usize> {
        let waiting = self.store.list_unfulfilled()?;

        let mut delivered = 0;
        for intent in waiting {
            info!(intent_id = %intent.id, user_id = %intent.user_id, "Resuming fulfillment");
            self.audit
                .record(&AuditEvent::new("fulfillment_resumed", &intent));
            if self.fulfill(&intent).await? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// `true` if this call delivered the reward.
    async fn fulfill(&self, intent: &PaymentIntent) -> Result<bool> {
        match self.dispatcher.fulfill(intent).await {
            Ok(FulfillmentOutcome::Delivered { .. }) => Ok(true),
            Ok(FulfillmentOutcome::AlreadyFulfilled) => Ok(false),
            Err(e) if e.is_intent_scoped() => {
                warn!(intent_id = %intent.id, error = %e, "Fulfillment did not complete");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Runs [`Reconciler::tick`] every `interval` until shut down.
pub struct ReconciliationLoop {
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl ReconciliationLoop {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// The first tick runs immediately. Shutdown is only observed between
    /// ticks, so a tick in progress always completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "Reconciliation loop started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciliation loop stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.reconciler.tick(Utc::now()).await {
                        Ok(report) if report.checked > 0 || report.resumed > 0 => {
                            info!(?report, "Reconciliation tick finished");
                        }
                        Ok(_) => debug!("Reconciliation tick found nothing to do"),
                        Err(e) => error!(error = %e, "Reconciliation tick aborted"),
                    }
                }
            }
        }
    }
}
