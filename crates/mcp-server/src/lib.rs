//! TaskWing tool server.
//!
//! Newline-delimited JSON-RPC 2.0 over stdio exposing the task tools and a few read-only
//! resources. The binary in `main.rs` wires it to the project root and, optionally, to the
//! watch engine.

pub mod hooks;
pub mod resources;
pub mod server;
pub mod tools;
pub mod transport;

pub use hooks::{HookEvent, LogHooks, RecordingHooks, ToolHooks, ToolOutcome};
pub use resources::ServerFacts;
pub use server::{McpServer, ServeOutcome, SERVER_NAME};
pub use tools::{ToolContext, ToolOutput, ToolResult};
