//! Session-pairing WebSocket relay daemon.
//!
//! Pairs an `agent` and a `relay` peer under a shared session id and
//! forwards text frames between them, best-effort, after validating a
//! shared-secret token on the upgrade request.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and server configuration.
pub mod config;
/// Connection wrapper and per-connection message loop.
pub mod connection;
/// Error types for relay operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Session registry pairing agent and relay peers.
pub mod registry;
/// Accept loop, shared server state, and the upgrade dispatcher.
pub mod server;
mod upgrade;

pub use server::{run, run_with_shutdown, ServerState};
