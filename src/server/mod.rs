//! The server half of the stdio protocol: tool, resource and prompt registries
//! plus a session loop answering one reply line per request line.

mod server;
mod session;

pub use server::{PromptHandler, ResourceHandler, StdioServer, ToolHandler};
