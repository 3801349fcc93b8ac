//! HTTP Surface
//!
//! Health, metrics and room presence routes next to the WebSocket endpoint.

pub mod handlers;
pub mod routes;
