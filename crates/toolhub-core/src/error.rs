//! Error types for Toolhub.
//!
//! Library crates keep their own detailed error enums and convert into this
//! type at the application boundary, where a recovery suggestion can be
//! attached for the user.

use thiserror::Error;

/// Result type alias using the Toolhub error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Toolhub.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A named tool server is not configured
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// A named tool is not offered by the server
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool server connection or protocol error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/toolhub/config.toml"),
            Error::UnknownServer(_) => Some("Use 'toolhub servers' to see configured servers"),
            Error::UnknownTool(_) => Some("Use 'toolhub tools <server>' to see available tools"),
            Error::Mcp(_) => Some("Run with --verbose to see the server conversation"),
            _ => None,
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_server_suggestion() {
        let err = Error::UnknownServer("search".to_string());
        assert_eq!(err.to_string(), "Unknown server: search");
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::Config("bad file".to_string());
        let output = format_error_with_suggestion(&err);
        assert!(output.starts_with("Configuration error: bad file"));
        assert!(output.contains("Suggestion:"));
    }

    #[test]
    fn test_internal_has_no_suggestion() {
        let err = Error::Internal("oops".to_string());
        assert_eq!(format_error_with_suggestion(&err), "Internal error: oops");
    }
}
