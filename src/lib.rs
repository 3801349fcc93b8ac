//! # Chat Hub Library
//!
//! The real-time messaging hub of a social platform:
//! - Registry of live WebSocket connections, indexed by user
//! - Room and platform-wide fan-out with slow-consumer eviction
//! - Per-connection inbound/outbound pumps with heartbeat
//!
//! Message persistence and room membership live behind the `ChatService`
//! trait; token verification behind `TokenVerifier`.
//!
//! ## Module Structure
//!
//! ```text
//! chat_hub/
//! +-- config/         Configuration management
//! +-- domain/         Message envelope and chat service contract
//! +-- infrastructure/ In-memory chat store and metrics
//! +-- presentation/   HTTP routes and the WebSocket hub
//! +-- shared/         Error types
//! ```

// Configuration module
pub mod config;

// Domain layer - Message types and collaborator contracts
pub mod domain;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
