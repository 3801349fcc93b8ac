//! Presentation Layer
//!
//! HTTP routes and the real-time WebSocket hub.

pub mod http;
pub mod websocket;
