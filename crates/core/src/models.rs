use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Confirmed,
    Expired,
}

impl IntentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to be paid on the shared deposit address.
///
/// While `status` is [`IntentStatus::Pending`] the intent holds the lease on
/// `address`. Terminal intents are kept for audit and never reopened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub user_id: String,
    pub address: String,
    /// Amount to match, in the token's smallest unit.
    pub expected_amount: i64,
    /// Display only.
    pub amount_usd: f64,
    pub status: IntentStatus,
    /// Ledger balance of `address` when the lease was granted.
    pub baseline_balance: i64,
    /// Balance delta observed at confirmation.
    #[serde(default)]
    pub received_amount: i64,
    pub tx_id: Option<String>,
    #[serde(default)]
    pub tx_id_synthetic: bool,
    pub confirmations: u32,
    pub block_number: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub leased_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub fulfilled: bool,
    #[serde(default)]
    pub needs_attention: bool,
    pub last_error: Option<String>,
    /// Bumped by the store on every successful write.
    #[serde(default)]
    pub revision: u64,
}

impl PaymentIntent {
    pub fn new(
        user_id: &str,
        address: &str,
        expected_amount: i64,
        amount_usd: f64,
        baseline_balance: i64,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            address: address.to_string(),
            expected_amount,
            amount_usd,
            status: IntentStatus::Pending,
            baseline_balance,
            received_amount: 0,
            tx_id: None,
            tx_id_synthetic: false,
            confirmations: 0,
            block_number: None,
            created_at: now,
            leased_at: now,
            expires_at: now + ttl,
            confirmed_at: None,
            updated_at: now,
            fulfilled: false,
            needs_attention: false,
            last_error: None,
            revision: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == IntentStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Balance growth since the lease was granted.
    pub fn delta(&self, current_balance: i64) -> i64 {
        current_balance.saturating_sub(self.baseline_balance)
    }

    /// The match test: a positive expectation met by the observed delta.
    pub fn is_satisfied_by(&self, delta: i64) -> bool {
        self.expected_amount > 0 && delta >= self.expected_amount
    }

    /// SHA-256 over the serialized record, hex encoded.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        compute_sha256_hex(&bytes)
    }
}

pub fn compute_sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
