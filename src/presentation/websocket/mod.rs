//! Real-time Hub
//!
//! Live connection registry, room fan-out and the per-socket read/write pumps.

pub mod auth;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod rooms;

pub use auth::{JwtVerifier, TokenVerifier};
pub use connection::{Connection, ConnectionSettings, ConnectionState};
pub use handler::ws_handler;
pub use hub::{ConnectionHandle, ConnectionId, Hub, HubConfig};
pub use rooms::RoomMembership;
