//! Client Module
//!
//! HTTP transport and upstream rate limit tracking for provider adapters.

pub mod http;
pub mod rate_limiter;

pub use http::HttpClient;
pub use rate_limiter::RateLimitTracker;
