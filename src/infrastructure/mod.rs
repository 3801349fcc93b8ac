//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - An in-memory chat history store
//! - Prometheus metrics

pub mod chat_store;
pub mod metrics;

pub use chat_store::InMemoryChatService;
