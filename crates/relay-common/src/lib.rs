//! Shared wire-protocol pieces for the pairing relay.
//!
//! This crate provides:
//! - RFC 6455 frame decoding and encoding ([`frame`])
//! - The WebSocket upgrade handshake and HTTP response rendering ([`handshake`])
//! - Peer roles and close-code constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod frame;
pub mod handshake;
pub mod types;

pub use types::Role;
