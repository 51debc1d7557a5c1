//! Address Lease Manager: at most one Pending intent per deposit address.
//!
//! Grants are serialized by `grant_lock`, and the store's lease tree rejects a
//! second Pending record for the same address even without it. Transitions
//! made here on an existing holder (re-issue, lazy expiry, late confirmation)
//! are revision-checked, so they can never overwrite a concurrent change made
//! by the reconciliation loop.

use crate::audit::{AuditEvent, AuditLog};
use crate::engine::{ConfirmationEngine, Evaluation, Evidence};
use crate::error::{Error, Result};
use crate::store::PaymentStore;
use crate::watcher::BalanceWatcher;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tronpay_core::PaymentIntent;

/// Conflicting writes are re-decided from fresh state this many times.
const GRANT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct LeasePolicy {
    pub ttl: chrono::Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeaseRequest {
    pub user_id: String,
    pub expected_amount: i64,
    pub amount_usd: f64,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    /// A new intent now holds the address.
    Granted(PaymentIntent),
    /// The requester's own Pending intent was refreshed in place.
    Reissued(PaymentIntent),
    /// Another user's Pending intent holds the address.
    Busy(PaymentIntent),
}

impl LeaseOutcome {
    pub fn granted(&self) -> bool {
        !matches!(self, Self::Busy(_))
    }

    pub fn intent(&self) -> &PaymentIntent {
        match self {
            Self::Granted(i) | Self::Reissued(i) | Self::Busy(i) => i,
        }
    }
}

pub struct LeaseManager {
    store: Arc<dyn PaymentStore>,
    watcher: BalanceWatcher,
    engine: Arc<ConfirmationEngine>,
    policy: LeasePolicy,
    audit: Arc<AuditLog>,
    grant_lock: Mutex<()>,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        watcher: BalanceWatcher,
        engine: Arc<ConfirmationEngine>,
        policy: LeasePolicy,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            watcher,
            engine,
            policy,
            audit,
            grant_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> LeasePolicy {
        self.policy
    }

    /// Grants, re-issues, or refuses the lease on `req.address`.
    ///
    /// The baseline is read from the ledger while the grant lock is held. If
    /// the ledger cannot be read the request fails; a guessed baseline could
    /// confirm on leftover balance.
    pub async fn request_lease(&self, req: LeaseRequest, now: DateTime<Utc>) -> Result<LeaseOutcome> {
        if req.user_id.trim().is_empty() {
            return Err(Error::InvalidRequest("user id is empty".into()));
        }
        if req.expected_amount <= 0 {
            return Err(Error::InvalidRequest(format!(
                "expected amount must be positive, got {}",
                req.expected_amount
            )));
        }

        let _guard = self.grant_lock.lock().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.decide(&req, now).await {
                Err(e @ (Error::StaleRevision { .. } | Error::AddressLeased { .. }))
                    if attempt < GRANT_ATTEMPTS =>
                {
                    warn!(address = %req.address, user_id = %req.user_id, error = %e, "Lease state changed underneath grant, retrying");
                }
                res => return res,
            }
        }
    }

    async fn decide(&self, req: &LeaseRequest, now: DateTime<Utc>) -> Result<LeaseOutcome> {
        let Some(holder) = self.store.get_active_by_address(&req.address)? else {
            return self.grant(req, now).await;
        };

        if holder.is_expired_at(now) {
            // Overdue holders are released here rather than waiting a tick.
            self.engine.expire(&holder, now)?;
            return self.grant(req, now).await;
        }

        if holder.user_id != req.user_id {
            debug!(address = %req.address, holder = %holder.id, user_id = %req.user_id, "Address busy");
            self.audit.record(&AuditEvent::new("lease_busy", &holder));
            return Ok(LeaseOutcome::Busy(holder));
        }

        let balance = self.watcher.read_balance(&req.address).await?;
        match self
            .engine
            .evaluate_confirmation(&holder, Evidence::Balance(balance), now)
            .await?
        {
            // Paid before asking again: the old intent stands and the
            // address is free for the new one.
            Evaluation::Confirmed(_) | Evaluation::Expired(_) => {
                self.create(req, balance.amount, now)
            }
            _ => self.reissue(holder, req, balance.amount, now),
        }
    }

    async fn grant(&self, req: &LeaseRequest, now: DateTime<Utc>) -> Result<LeaseOutcome> {
        let balance = self.watcher.read_balance(&req.address).await?;
        self.create(req, balance.amount, now)
    }

    fn create(&self, req: &LeaseRequest, baseline: i64, now: DateTime<Utc>) -> Result<LeaseOutcome> {
        let intent = PaymentIntent::new(
            &req.user_id,
            &req.address,
            req.expected_amount,
            req.amount_usd,
            baseline,
            now,
            self.policy.ttl,
        );
        let stored = self.store.create(&intent)?;

        info!(
            intent_id = %stored.id,
            user_id = %stored.user_id,
            address = %stored.address,
            expected = stored.expected_amount,
            baseline = stored.baseline_balance,
            "Lease granted"
        );
        self.audit
            .record(&AuditEvent::new("intent_created", &stored).with_amount(stored.expected_amount));
        Ok(LeaseOutcome::Granted(stored))
    }

    fn reissue(
        &self,
        holder: PaymentIntent,
        req: &LeaseRequest,
        baseline: i64,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome> {
        let mut next = holder;
        next.expected_amount = req.expected_amount;
        next.amount_usd = req.amount_usd;
        next.baseline_balance = baseline;
        next.leased_at = now;
        next.expires_at = now + self.policy.ttl;
        next.updated_at = now;
        let stored = self.store.update(&next)?;

        info!(
            intent_id = %stored.id,
            user_id = %stored.user_id,
            baseline = stored.baseline_balance,
            expires_at = %stored.expires_at,
            "Lease re-issued"
        );
        self.audit
            .record(&AuditEvent::new("intent_reissued", &stored).with_amount(stored.expected_amount));
        Ok(LeaseOutcome::Reissued(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConfirmationPolicy;
    use crate::store::SledPaymentStore;
    use ledger::mock::MockLedger;
    use ledger::LedgerError;
    use std::time::Duration;
    use tronpay_core::IntentStatus;

    const ADDR: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    fn setup() -> (Arc<SledPaymentStore>, Arc<MockLedger>, LeaseManager) {
        let store = Arc::new(SledPaymentStore::temporary().unwrap());
        let ledger = MockLedger::new();
        let watcher = BalanceWatcher::new(ledger.clone(), Duration::from_secs(1));
        let audit = Arc::new(AuditLog::disabled());
        let engine = Arc::new(ConfirmationEngine::new(
            store.clone(),
            watcher.clone(),
            ConfirmationPolicy::default(),
            audit.clone(),
        ));
        let leases = LeaseManager::new(store.clone(), watcher, engine, LeasePolicy::default(), audit);
        (store, ledger, leases)
    }

    fn req(user: &str, expected: i64) -> LeaseRequest {
        LeaseRequest {
            user_id: user.into(),
            expected_amount: expected,
            amount_usd: 10.0,
            address: ADDR.into(),
        }
    }

    #[tokio::test]
    async fn first_request_captures_baseline() {
        let (store, ledger, leases) = setup();
        ledger.set_balance(ADDR, 5_000_000);

        let out = leases.request_lease(req("1", 10_000_000), Utc::now()).await.unwrap();
        let LeaseOutcome::Granted(intent) = out else {
            panic!("expected grant, got {out:?}");
        };
        assert_eq!(intent.baseline_balance, 5_000_000);
        assert_eq!(intent.expires_at - intent.created_at, chrono::Duration::hours(24));
        assert_eq!(store.get_active_by_address(ADDR).unwrap().unwrap().id, intent.id);
    }

    #[tokio::test]
    async fn unknown_address_grants_with_zero_baseline() {
        let (_store, _ledger, leases) = setup();
        let out = leases.request_lease(req("1", 10), Utc::now()).await.unwrap();
        assert_eq!(out.intent().baseline_balance, 0);
    }

    #[tokio::test]
    async fn other_user_is_told_busy() {
        let (store, ledger, leases) = setup();
        ledger.set_balance(ADDR, 0);
        let first = leases.request_lease(req("1", 10), Utc::now()).await.unwrap();

        let second = leases.request_lease(req("2", 10), Utc::now()).await.unwrap();
        assert!(!second.granted());
        assert_eq!(second.intent().id, first.intent().id);
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_user_reissues_in_place() {
        let (store, ledger, leases) = setup();
        ledger.set_balance(ADDR, 100);
        let t0 = Utc::now();
        let first = leases.request_lease(req("1", 10_000), t0).await.unwrap();

        ledger.set_balance(ADDR, 150);
        let t1 = t0 + chrono::Duration::minutes(5);
        let again = leases.request_lease(req("1", 20_000), t1).await.unwrap();
        let LeaseOutcome::Reissued(intent) = again else {
            panic!("expected re-issue, got {again:?}");
        };
        assert_eq!(intent.id, first.intent().id);
        assert_eq!(intent.baseline_balance, 150);
        assert_eq!(intent.expected_amount, 20_000);
        assert_eq!(intent.leased_at, t1);
        assert_eq!(intent.expires_at, t1 + chrono::Duration::hours(24));
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn paid_holder_is_confirmed_not_reissued() {
        let (store, ledger, leases) = setup();
        ledger.set_balance(ADDR, 0);
        let first = leases.request_lease(req("1", 10), Utc::now()).await.unwrap();

        ledger.set_balance(ADDR, 10);
        let again = leases.request_lease(req("1", 10), Utc::now()).await.unwrap();
        let LeaseOutcome::Granted(fresh) = again else {
            panic!("expected a fresh grant, got {again:?}");
        };
        assert_ne!(fresh.id, first.intent().id);
        assert_eq!(fresh.baseline_balance, 10);

        let old = store.get(&first.intent().id).unwrap().unwrap();
        assert_eq!(old.status, IntentStatus::Confirmed);
        assert!(!old.fulfilled);
    }

    #[tokio::test]
    async fn overdue_holder_is_expired_on_demand() {
        let (store, ledger, leases) = setup();
        ledger.set_balance(ADDR, 0);
        let t0 = Utc::now();
        let first = leases.request_lease(req("1", 10), t0).await.unwrap();

        let late = t0 + chrono::Duration::hours(25);
        let second = leases.request_lease(req("2", 10), late).await.unwrap();
        assert!(matches!(second, LeaseOutcome::Granted(_)));

        let old = store.get(&first.intent().id).unwrap().unwrap();
        assert_eq!(old.status, IntentStatus::Expired);
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ledger_failure_refuses_the_grant() {
        let (store, ledger, leases) = setup();
        ledger.fail_with(ADDR, LedgerError::Transient("down".into()));

        let err = leases.request_lease(req("1", 10), Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
        assert!(store.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts() {
        let (_store, _ledger, leases) = setup();
        for amount in [0, -5] {
            let err = leases.request_lease(req("1", amount), Utc::now()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidRequest(_)));
        }
    }
}
