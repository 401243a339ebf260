//! Router Module
//!
//! Alias resolution, fallback chain selection and provider attribution.

pub mod alias;
pub mod strategy;
pub mod table;

pub use alias::AliasTable;
pub use strategy::ModelRoute;
pub use table::{select, RoutingTable};
