//! HTTP Handlers
//!
//! Request handlers for the hub's small HTTP surface.

pub mod health;
pub mod rooms;
