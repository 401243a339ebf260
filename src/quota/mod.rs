//! Quota Module
//!
//! Per-key request rate, token rate and budget enforcement.

pub mod admission;
pub mod ledger;
pub mod pricing;
pub mod store;
pub mod window;

pub use admission::{Admission, QuotaDenial, QuotaDimension, QuotaUsage, Reservation};
pub use ledger::QuotaLedger;
pub use pricing::{CostModel, FlatRatePricing, NoCost};
pub use store::{InMemoryQuotaStore, QuotaStore};
pub use window::{Clock, ManualClock, SystemClock};
