//! # Domain Layer
//!
//! Message envelope types and the contract of the external chat history
//! store. Nothing here depends on sockets or the hub.
//!
//! ## Structure
//!
//! - **message**: wire envelope, message kinds, persisted messages and rooms
//! - **chat_service**: the `ChatService` trait the hub calls into

pub mod chat_service;
pub mod message;

pub use chat_service::{ChatService, ChatServiceError};
pub use message::{Envelope, MessageKind, PersistedMessage, Room, UserStatus};
