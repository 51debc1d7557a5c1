//! Error types for the reconciliation core.

use ledger::LedgerError;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The store could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted record failed to decode.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("intent {0} not found")]
    IntentNotFound(Uuid),

    /// Another intent already holds the address lease.
    #[error("address {address} is leased by intent {holder}")]
    AddressLeased { address: String, holder: Uuid },

    /// The record changed since it was read.
    #[error("stale write for intent {id}: expected revision {expected}, found {found}")]
    StaleRevision { id: Uuid, expected: u64, found: u64 },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Fulfillment was claimed but the user-visible delivery failed.
    #[error("delivery for intent {id} failed: {reason}")]
    Delivery { id: Uuid, reason: String },
}

impl Error {
    /// Errors confined to one intent; the rest of a tick can proceed.
    pub fn is_intent_scoped(&self) -> bool {
        matches!(
            self,
            Self::IntentNotFound(_)
                | Self::AddressLeased { .. }
                | Self::StaleRevision { .. }
                | Self::Ledger(_)
                | Self::InvalidRequest(_)
                | Self::Delivery { .. }
        )
    }
}
