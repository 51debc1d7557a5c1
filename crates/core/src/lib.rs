pub mod address;
pub mod amounts;
pub mod models;

pub use address::{validate_tron_address, AddressError, Network};
pub use amounts::{Pricing, Token};
pub use models::{IntentStatus, PaymentIntent};
