//! Configuration Module
//!
//! Configuration snapshot, fluent builder and file loading.

pub mod builder;
pub mod loader;
pub mod snapshot;

pub use builder::ConfigBuilder;
pub use loader::ConfigLoader;
pub use snapshot::{GatewayConfig, QuotaSpec, RoutingRule};
