//! Line-delimited JSON-RPC over a child process's stdio.
//!
//! [`StdioClient`] spawns a program, writes one JSON message per line to its
//! stdin and collects every JSON line it prints on stdout, so callers can wait
//! for a response by id. [`handshake`] runs the MCP bring-up sequence on top
//! of it. [`StdioServer`] is the other end of the pipe.

pub mod client;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod types;
#[cfg(feature = "weather")]
pub mod weather;

pub use client::{handshake, HandshakeConfig, HandshakeOutcome, StdioClient, StdioConfig};
pub use error::{Error, HandshakeStep, Result};
pub use server::{PromptHandler, ResourceHandler, StdioServer, ToolHandler};
pub use types::*;
