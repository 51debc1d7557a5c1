//! Front-end boundary: turn "user wants to pay $N" into deposit instructions.

use crate::error::{Error, Result};
use crate::lease::{LeaseManager, LeaseOutcome, LeaseRequest};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tronpay_core::Pricing;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    Ready {
        intent_id: Uuid,
        deposit_address: String,
        expected_amount: i64,
        expires_at: DateTime<Utc>,
    },
    /// Someone else is paying; the address frees up by `retry_after` at the latest.
    Busy { retry_after: DateTime<Utc> },
}

pub struct PaymentIntake {
    leases: Arc<LeaseManager>,
    deposit_address: String,
    pricing: Pricing,
}

impl PaymentIntake {
    pub fn new(leases: Arc<LeaseManager>, deposit_address: impl Into<String>, pricing: Pricing) -> Self {
        Self {
            leases,
            deposit_address: deposit_address.into(),
            pricing,
        }
    }

    pub fn deposit_address(&self) -> &str {
        &self.deposit_address
    }

    pub async fn create_payment_intent(
        &self,
        user_id: &str,
        amount_usd: f64,
        now: DateTime<Utc>,
    ) -> Result<IntakeOutcome> {
        let expected_amount = self.pricing.expected_units(amount_usd).ok_or_else(|| {
            Error::InvalidRequest(format!("cannot price a payment of ${amount_usd}"))
        })?;

        let req = LeaseRequest {
            user_id: user_id.to_string(),
            expected_amount,
            amount_usd,
            address: self.deposit_address.clone(),
        };
        Ok(match self.leases.request_lease(req, now).await? {
            LeaseOutcome::Granted(intent) | LeaseOutcome::Reissued(intent) => IntakeOutcome::Ready {
                intent_id: intent.id,
                deposit_address: intent.address,
                expected_amount: intent.expected_amount,
                expires_at: intent.expires_at,
            },
            LeaseOutcome::Busy(holder) => IntakeOutcome::Busy {
                retry_after: holder.expires_at,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::engine::{ConfirmationEngine, ConfirmationPolicy};
    use crate::lease::LeasePolicy;
    use crate::store::SledPaymentStore;
    use crate::watcher::BalanceWatcher;
    use ledger::mock::MockLedger;
    use std::time::Duration;

    const ADDR: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    fn intake() -> PaymentIntake {
        let store = Arc::new(SledPaymentStore::temporary().unwrap());
        let ledger = MockLedger::new();
        ledger.set_balance(ADDR, 0);
        let watcher = BalanceWatcher::new(ledger, Duration::from_secs(1));
        let audit = Arc::new(AuditLog::disabled());
        let engine = Arc::new(ConfirmationEngine::new(
            store.clone(),
            watcher.clone(),
            ConfirmationPolicy::default(),
            audit.clone(),
        ));
        let leases = Arc::new(LeaseManager::new(
            store,
            watcher,
            engine,
            LeasePolicy::default(),
            audit,
        ));
        PaymentIntake::new(leases, ADDR, Pricing::new(1_000_000))
    }

    #[tokio::test]
    async fn ten_dollars_is_ten_million_units() {
        let intake = intake();
        let now = Utc::now();
        let out = intake.create_payment_intent("1", 10.0, now).await.unwrap();
        let IntakeOutcome::Ready {
            deposit_address,
            expected_amount,
            expires_at,
            ..
        } = out
        else {
            panic!("expected instructions, got {out:?}");
        };
        assert_eq!(deposit_address, ADDR);
        assert_eq!(expected_amount, 10_000_000);
        assert_eq!(expires_at, now + chrono::Duration::hours(24));
    }

    #[tokio::test]
    async fn busy_reports_when_to_retry() {
        let intake = intake();
        let now = Utc::now();
        let IntakeOutcome::Ready { expires_at, .. } =
            intake.create_payment_intent("1", 10.0, now).await.unwrap()
        else {
            panic!("expected instructions");
        };

        let out = intake.create_payment_intent("2", 10.0, now).await.unwrap();
        assert_eq!(out, IntakeOutcome::Busy { retry_after: expires_at });
    }

    #[tokio::test]
    async fn unpriceable_amounts_are_rejected() {
        let intake = intake();
        for usd in [0.0, -1.0, f64::NAN] {
            let err = intake.create_payment_intent("1", usd, Utc::now()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidRequest(_)));
        }
    }
}
