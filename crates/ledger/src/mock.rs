use super::{Balance, Deposit, LedgerClient, LedgerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

#[derive(Default)]
struct State {
    balances: HashMap<String, i64>,
    failures: HashMap<String, LedgerError>,
    deposits: HashMap<String, Vec<Deposit>>,
    latency: Option<Duration>,
}

/// In-memory ledger with settable balances and injectable failures.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<State>,
    balance_calls: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_balance(&self, address: &str, amount: i64) {
        self.lock().balances.insert(address.to_string(), amount);
    }

    /// Every lookup for `address` fails with `err` until cleared.
    pub fn fail_with(&self, address: &str, err: LedgerError) {
        self.lock().failures.insert(address.to_string(), err);
    }

    pub fn clear_failure(&self, address: &str) {
        self.lock().failures.remove(address);
    }

    pub fn push_deposit(&self, address: &str, deposit: Deposit) {
        self.lock()
            .deposits
            .entry(address.to_string())
            .or_default()
            .push(deposit);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_balance(&self, address: &str) -> Result<Balance, LedgerError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            sleep(latency).await;
        }

        let state = self.lock();
        if let Some(err) = state.failures.get(address) {
            return Err(err.clone());
        }
        match state.balances.get(address) {
            Some(amount) => Ok(Balance {
                amount: *amount,
                as_of: Utc::now(),
            }),
            None => Err(LedgerError::NotFound(address.to_string())),
        }
    }

    async fn latest_deposit(
        &self,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Deposit>, LedgerError> {
        let state = self.lock();
        if let Some(err) = state.failures.get(address) {
            return Err(err.clone());
        }
        Ok(state
            .deposits
            .get(address)
            .and_then(|list| {
                list.iter()
                    .filter(|d| d.timestamp >= since)
                    .max_by_key(|d| d.timestamp)
            })
            .cloned())
    }
}
