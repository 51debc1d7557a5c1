use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Smallest unit of the configured token.
    pub amount: i64,
    pub as_of: DateTime<Utc>,
}

/// An incoming transfer to a watched address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub tx_id: String,
    pub amount: i64,
    pub block_number: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("address {0} not found on ledger")]
    NotFound(String),

    #[error("transient ledger failure: {0}")]
    Transient(String),

    #[error("rate limited by ledger (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("unexpected ledger response: {0}")]
    Unexpected(String),
}

impl LedgerError {
    /// Everything except a missing address is worth asking again next tick.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound(_))
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_balance(&self, address: &str) -> Result<Balance, LedgerError>;

    /// Newest incoming transfer to `address` at or after `since`, if the
    /// ledger can report one.
    async fn latest_deposit(
        &self,
        _address: &str,
        _since: DateTime<Utc>,
    ) -> Result<Option<Deposit>, LedgerError> {
        Ok(None)
    }
}

pub mod mock;
pub mod trongrid;
