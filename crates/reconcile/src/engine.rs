//! Pending → Confirmed | Expired transitions.
//!
//! Every state change of a payment intent, whether driven by the polling loop
//! or by a pushed deposit, goes through [`ConfirmationEngine::evaluate_confirmation`]
//! or [`ConfirmationEngine::expire`]. The store's revision check makes a second
//! concurrent transition of the same intent fail instead of overwrite.
//!
//! Matching works from balance deltas against the baseline captured at lease
//! time. Two deposits that together reach the expected amount are
//! indistinguishable from one, and overpayment confirms with the full delta
//! recorded in `received_amount`. On a balance match the newest transfer since
//! the lease is recorded as the paying transaction only if it covers the
//! expected amount by itself; otherwise the id is synthetic.

use crate::audit::{AuditEvent, AuditLog};
use crate::error::Result;
use crate::store::PaymentStore;
use crate::watcher::BalanceWatcher;
use chrono::{DateTime, Utc};
use ledger::{Balance, Deposit};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tronpay_core::{IntentStatus, PaymentIntent};

#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    /// Recorded on every confirmation; not verified against the chain.
    pub required_confirmations: u32,
    pub synthetic_tx_prefix: String,
    /// Ask the ledger for the depositing transaction on confirmation.
    pub lookup_transactions: bool,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            required_confirmations: 25,
            synthetic_tx_prefix: "synthetic".to_string(),
            lookup_transactions: true,
        }
    }
}

/// What was observed about the intent's address.
#[derive(Debug, Clone)]
pub enum Evidence {
    /// A polled balance; matched as a delta from the baseline.
    Balance(Balance),
    /// A single pushed transfer; matched on its own amount.
    Transfer(Deposit),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Confirmed(PaymentIntent),
    Expired(PaymentIntent),
    Pending { delta: i64 },
    /// The ledger could not be read; try again next tick.
    Deferred { reason: String },
    /// The intent had already left Pending.
    Unchanged(IntentStatus),
}

pub struct ConfirmationEngine {
    store: Arc<dyn PaymentStore>,
    watcher: BalanceWatcher,
    policy: ConfirmationPolicy,
    audit: Arc<AuditLog>,
}

impl ConfirmationEngine {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        watcher: BalanceWatcher,
        policy: ConfirmationPolicy,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            watcher,
            policy,
            audit,
        }
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    /// One polling pass over a single intent.
    pub async fn step(&self, intent: &PaymentIntent, now: DateTime<Utc>) -> Result<Evaluation> {
        if !intent.is_pending() {
            return Ok(Evaluation::Unchanged(intent.status));
        }
        if intent.is_expired_at(now) {
            return self.expire(intent, now).map(Evaluation::Expired);
        }

        match self.watcher.read_balance(&intent.address).await {
            Ok(balance) => {
                self.evaluate_confirmation(intent, Evidence::Balance(balance), now)
                    .await
            }
            Err(e) => {
                warn!(intent_id = %intent.id, address = %intent.address, error = %e, "Balance check failed, retrying next tick");
                Ok(Evaluation::Deferred {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Decides whether `evidence` confirms `intent`, and persists the
    /// transition if it does.
    pub async fn evaluate_confirmation(
        &self,
        intent: &PaymentIntent,
        evidence: Evidence,
        now: DateTime<Utc>,
    ) -> Result<Evaluation> {
        if !intent.is_pending() {
            return Ok(Evaluation::Unchanged(intent.status));
        }
        if intent.is_expired_at(now) {
            return self.expire(intent, now).map(Evaluation::Expired);
        }

        let (delta, deposit) = match evidence {
            Evidence::Balance(balance) => {
                let delta = intent.delta(balance.amount);
                debug!(
                    intent_id = %intent.id,
                    balance = balance.amount,
                    baseline = intent.baseline_balance,
                    delta,
                    expected = intent.expected_amount,
                    "Balance observed"
                );
                (delta, None)
            }
            Evidence::Transfer(deposit) => {
                if deposit.timestamp < intent.leased_at {
                    debug!(intent_id = %intent.id, tx_id = %deposit.tx_id, "Ignoring transfer older than the lease");
                    return Ok(Evaluation::Pending { delta: 0 });
                }
                (deposit.amount, Some(deposit))
            }
        };

        if !intent.is_satisfied_by(delta) {
            return Ok(Evaluation::Pending { delta });
        }

        let deposit = match deposit {
            Some(d) => Some(d),
            None => self.lookup_deposit(intent).await,
        };
        self.confirm(intent, delta, deposit, now)
            .map(Evaluation::Confirmed)
    }

    /// Moves a Pending intent to Expired, regardless of balance.
    pub fn expire(&self, intent: &PaymentIntent, now: DateTime<Utc>) -> Result<PaymentIntent> {
        let mut next = intent.clone();
        next.status = IntentStatus::Expired;
        next.updated_at = now;
        let stored = self.store.update(&next)?;

        info!(intent_id = %stored.id, user_id = %stored.user_id, address = %stored.address, "Payment intent expired");
        self.audit.record(&AuditEvent::new("intent_expired", &stored));
        Ok(stored)
    }

    async fn lookup_deposit(&self, intent: &PaymentIntent) -> Option<Deposit> {
        if !self.policy.lookup_transactions {
            return None;
        }
        match self
            .watcher
            .latest_deposit(&intent.address, intent.leased_at)
            .await
        {
            // A smaller transfer cannot be the payment on its own.
            Ok(Some(d)) if d.amount < intent.expected_amount => {
                debug!(intent_id = %intent.id, tx_id = %d.tx_id, amount = d.amount, "Latest transfer is below the expected amount, using synthetic id");
                None
            }
            Ok(found) => found,
            Err(e) => {
                warn!(intent_id = %intent.id, error = %e, "Transaction lookup failed, using synthetic id");
                None
            }
        }
    }

    fn confirm(
        &self,
        intent: &PaymentIntent,
        delta: i64,
        deposit: Option<Deposit>,
        now: DateTime<Utc>,
    ) -> Result<PaymentIntent> {
        let mut next = intent.clone();
        next.status = IntentStatus::Confirmed;
        next.received_amount = delta;
        next.confirmed_at = Some(now);
        next.updated_at = now;
        next.confirmations = self.policy.required_confirmations;

        match deposit {
            Some(d) => {
                next.tx_id = Some(d.tx_id);
                next.tx_id_synthetic = false;
                next.block_number = d.block_number;
            }
            None => {
                next.tx_id = Some(self.synthetic_tx_id(intent, now));
                next.tx_id_synthetic = true;
            }
        }

        let stored = self.store.update(&next)?;
        if delta > stored.expected_amount {
            info!(intent_id = %stored.id, overpaid = delta - stored.expected_amount, "Payment exceeds expected amount");
        }
        info!(
            intent_id = %stored.id,
            user_id = %stored.user_id,
            tx_id = stored.tx_id.as_deref().unwrap_or_default(),
            synthetic = stored.tx_id_synthetic,
            received = delta,
            "Payment confirmed"
        );
        self.audit
            .record(&AuditEvent::new("intent_confirmed", &stored).with_amount(delta));
        Ok(stored)
    }

    fn synthetic_tx_id(&self, intent: &PaymentIntent, now: DateTime<Utc>) -> String {
        let id = intent.id.simple().to_string();
        format!(
            "{}-{}-{}",
            self.policy.synthetic_tx_prefix,
            now.timestamp(),
            &id[..8]
        )
    }
}
