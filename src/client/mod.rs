//! Defines the public API for the stdio client.

mod client;
mod handshake;
mod session;

pub use client::{into_result, StdioClient, StdioConfig, DEFAULT_CLOSE_GRACE, DEFAULT_RESPONSE_TIMEOUT};
pub use handshake::{handshake, HandshakeConfig, HandshakeOutcome, DEFAULT_SETTLE_INTERVAL};
