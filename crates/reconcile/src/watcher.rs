//! Bounded-time balance reads for the shared deposit address.

use chrono::{DateTime, Utc};
use ledger::{Balance, Deposit, LedgerClient, LedgerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub const MAX_LEDGER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct BalanceWatcher {
    ledger: Arc<dyn LedgerClient>,
    timeout: Duration,
}

impl BalanceWatcher {
    /// `call_timeout` is clamped to [`MAX_LEDGER_TIMEOUT`].
    pub fn new(ledger: Arc<dyn LedgerClient>, call_timeout: Duration) -> Self {
        Self {
            ledger,
            timeout: call_timeout.min(MAX_LEDGER_TIMEOUT),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current balance of `address`.
    ///
    /// An address the ledger has never seen reads as zero; every other
    /// failure, including a timeout, is returned for the caller to retry.
    pub async fn read_balance(&self, address: &str) -> Result<Balance, LedgerError> {
        match timeout(self.timeout, self.ledger.get_balance(address)).await {
            Ok(Ok(balance)) => Ok(balance),
            Ok(Err(LedgerError::NotFound(_))) => {
                debug!(address = %address, "Address not on ledger yet, reading as zero");
                Ok(Balance {
                    amount: 0,
                    as_of: Utc::now(),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LedgerError::Transient(format!(
                "balance lookup timed out after {:?}",
                self.timeout
            ))),
        }
    }

    pub async fn latest_deposit(
        &self,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Deposit>, LedgerError> {
        match timeout(self.timeout, self.ledger.latest_deposit(address, since)).await {
            Ok(res) => res,
            Err(_) => Err(LedgerError::Transient(format!(
                "deposit lookup timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::mock::MockLedger;

    const ADDR: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    #[tokio::test]
    async fn unknown_address_reads_zero() {
        let ledger = MockLedger::new();
        let watcher = BalanceWatcher::new(ledger, Duration::from_secs(1));
        assert_eq!(watcher.read_balance(ADDR).await.unwrap().amount, 0);
    }

    #[tokio::test]
    async fn transient_errors_surface() {
        let ledger = MockLedger::new();
        ledger.fail_with(ADDR, LedgerError::RateLimited { retry_after: None });
        let watcher = BalanceWatcher::new(ledger, Duration::from_secs(1));
        let err = watcher.read_balance(ADDR).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ledger_times_out() {
        let ledger = MockLedger::new();
        ledger.set_balance(ADDR, 1);
        ledger.set_latency(Some(Duration::from_secs(60)));
        let watcher = BalanceWatcher::new(ledger, Duration::from_secs(2));
        let err = watcher.read_balance(ADDR).await.unwrap_err();
        assert!(matches!(err, LedgerError::Transient(msg) if msg.contains("timed out")));
    }

    #[test]
    fn timeout_is_clamped() {
        let watcher = BalanceWatcher::new(MockLedger::new(), Duration::from_secs(120));
        assert_eq!(watcher.timeout(), MAX_LEDGER_TIMEOUT);
    }
}
