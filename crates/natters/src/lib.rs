//! natter messaging server: WebSocket sessions, point-to-point routing and the friend graph.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// HTTP API for friend management and presence.
pub mod api;
/// Bearer token issuing and validation.
pub mod auth;
/// CLI argument parsing and server configuration.
pub mod config;
/// Per-connection state machine and socket loop.
pub mod connection;
/// Error types for server operations.
pub mod error;
/// Login frame validation.
pub mod handshake;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Friend request and chat alert delivery.
pub mod notify;
/// Identity → connection table.
pub mod registry;
/// Point-to-point message forwarding.
pub mod router;
/// Accept loop and shared server state.
pub mod server;
/// Friend graph persistence.
pub mod store;

pub use server::{run, run_with_shutdown, ServerState};
