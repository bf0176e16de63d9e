//! # toolhub-mcp
//!
//! Connection manager for MCP (Model Context Protocol) tool servers.
//!
//! This crate provides:
//! - stdio, streamable HTTP, SSE and WebSocket transports
//! - A JSON-RPC client session with the initialize handshake
//! - Supervised, cached connections with orderly shutdown
//! - Conversion of workflow proxy results into MCP content

pub mod config;
pub mod connection;
pub mod content;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod signal;
pub mod store;
pub mod transport;

pub use config::{ServerConfig, ServerEntry, TransportConfig, TransportKind};
pub use connection::{Connection, LifecycleState, ServerStatus};
pub use content::{classify, ContentAdapter, WorkflowOutput};
pub use error::{ConnectionFailure, FailureCategory, McpError, TransportError};
pub use manager::{ConnectionManager, ManagerConfig, ServerSurvey, ShutdownReport};
pub use protocol::{CallToolResult, ToolContent, ToolDescriptor};
pub use store::{MemoryServerStore, ServerStore, StoredServer};
