//! MCP-specific error types.

use std::fmt;

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// HTTP request failed before a status was received.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with 404.
    #[error("{0} Not Found")]
    NotFound(u16),

    /// The endpoint answered with another unsuccessful status.
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// WebSocket failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server did not answer in time.
    #[error("transport timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// The SSE stream ended before announcing its message endpoint.
    #[error("SSE stream ended before the endpoint event")]
    MissingEndpoint,

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    /// Map an HTTP status to the matching error.
    pub fn from_status(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        if status == reqwest::StatusCode::NOT_FOUND {
            Self::NotFound(status.as_u16())
        } else {
            Self::Status {
                status: status.as_u16(),
                body: body.into(),
            }
        }
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Server configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The configured transport kind is not recognised.
    #[error("unsupported transport '{kind}' for server {server}")]
    UnsupportedTransport { server: String, kind: String },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level error (malformed messages, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server name is not present in the configuration.
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// Tool is not in the server's cached tool list.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The connection has no open session.
    #[error("server {0} is not connected")]
    NotConnected(String),

    /// The connection failed while starting up.
    #[error("server {server} is unavailable: {reason}")]
    Unavailable { server: String, reason: String },

    /// Server returned an error response.
    #[error("server error (code {code}): {message}")]
    ServerError { code: i32, message: String },

    /// A tool result could not be mapped to content.
    #[error("unrecognised result shape: {0}")]
    Classification(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The manager has started tearing down.
    #[error("connection manager is shutting down")]
    ShuttingDown,
}

impl McpError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a classification error.
    pub fn classification(msg: impl Into<String>) -> Self {
        Self::Classification(msg.into())
    }

    /// Create a server error from JSON-RPC error.
    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    /// Whether the underlying failure is an HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Transport(TransportError::NotFound(_)))
    }
}

impl From<McpError> for toolhub_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::UnknownServer(name) => toolhub_core::Error::UnknownServer(name),
            McpError::UnknownTool(name) => toolhub_core::Error::UnknownTool(name),
            McpError::Configuration(msg) => toolhub_core::Error::Config(msg),
            other => toolhub_core::Error::Mcp(other.to_string()),
        }
    }
}

/// Coarse failure kind stored on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// The server endpoint does not exist (HTTP 404).
    ResourceNotFound,
    /// Anything else.
    Generic,
}

/// The error that ended a connection, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl ConnectionFailure {
    /// Classify an error into a stored failure.
    pub fn classify(error: &McpError) -> Self {
        if error.is_not_found() {
            Self {
                category: FailureCategory::ResourceNotFound,
                message: "404 Not Found".to_string(),
            }
        } else {
            Self {
                category: FailureCategory::Generic,
                message: error.to_string(),
            }
        }
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            FailureCategory::ResourceNotFound => write!(f, "server not found: {}", self.message),
            FailureCategory::Generic => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(err.to_string(), "connection closed");
        assert_eq!(TransportError::NotFound(404).to_string(), "404 Not Found");
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::UnknownServer("search".to_string());
        assert_eq!(err.to_string(), "unknown server: search");

        let err = McpError::server_error(-32600, "Invalid request");
        assert_eq!(err.to_string(), "server error (code -32600): Invalid request");

        let err = McpError::UnsupportedTransport {
            server: "x".to_string(),
            kind: "carrier-pigeon".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported transport 'carrier-pigeon' for server x");
    }

    #[test]
    fn test_not_found_classification() {
        let err = McpError::Transport(TransportError::NotFound(404));
        let failure = ConnectionFailure::classify(&err);
        assert_eq!(failure.category, FailureCategory::ResourceNotFound);
        assert_eq!(failure.to_string(), "server not found: 404 Not Found");
    }

    #[test]
    fn test_generic_classification_keeps_message() {
        let err = McpError::Transport(TransportError::ConnectionClosed);
        let failure = ConnectionFailure::classify(&err);
        assert_eq!(failure.category, FailureCategory::Generic);
        assert_eq!(failure.to_string(), "transport error: connection closed");
    }

    #[test]
    fn test_mcp_error_to_core_error() {
        let core_err: toolhub_core::Error = McpError::protocol("bad frame").into();
        assert!(matches!(core_err, toolhub_core::Error::Mcp(_)));

        let core_err: toolhub_core::Error = McpError::UnknownTool("grep".into()).into();
        assert!(matches!(core_err, toolhub_core::Error::UnknownTool(_)));
    }
}
