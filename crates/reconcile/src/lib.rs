//! Payment reconciliation for a single shared deposit address.
//!
//! The pieces, leaf first: [`store`] persists intents and address leases,
//! [`watcher`] reads balances with a hard timeout, [`lease`] grants the
//! address, [`engine`] owns the Pending → Confirmed | Expired transitions,
//! [`dispatcher`] delivers rewards exactly once, and [`scheduler`] ties them
//! together on a timer.

pub mod audit;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod intake;
pub mod lease;
pub mod scheduler;
pub mod store;
pub mod watcher;

pub use audit::{AuditEvent, AuditLog};
pub use dispatcher::{FulfillmentDispatcher, FulfillmentOutcome};
pub use engine::{ConfirmationEngine, ConfirmationPolicy, Evaluation, Evidence};
pub use error::{Error, Result};
pub use intake::{IntakeOutcome, PaymentIntake};
pub use lease::{LeaseManager, LeaseOutcome, LeasePolicy, LeaseRequest};
pub use scheduler::{ReconciliationLoop, Reconciler, TickReport};
pub use store::{PaymentStore, SledPaymentStore};
pub use watcher::BalanceWatcher;
