//! API Module
//!
//! Normalized chat request and response types shared with provider adapters.

pub mod chat;

pub use chat::{ChatMessage, ChatRequest, ChatResponse, Choice, Role, Usage};
