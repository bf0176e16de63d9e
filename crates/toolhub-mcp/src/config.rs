//! Tool server configuration.
//!
//! Servers are described by raw [`ServerEntry`] records, read from a JSON
//! file shaped like `{"mcp": {"servers": {"name": {...}}}}` and from an
//! external [`ServerStore`](crate::store::ServerStore). An entry is resolved
//! into a typed [`ServerConfig`] only when a connection is created, so an
//! unknown transport kind is reported to the caller that asked for it.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::McpError;

/// Raw configuration record for one server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Transport kind: stdio, streamable_http, sse or websocket.
    pub transport: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment overrides for subprocess servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Session to resume on streamable HTTP servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_on_close: Option<bool>,
}

impl ServerEntry {
    /// Entry for a subprocess server.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: "stdio".to_string(),
            command: Some(command.into()),
            args,
            ..Default::default()
        }
    }

    /// Entry for a network server of the given kind.
    pub fn remote(transport: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Add an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.get_or_insert_with(HashMap::new).insert(key.into(), value.into());
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.get_or_insert_with(HashMap::new).insert(key.into(), value.into());
        self
    }
}

/// Transport kinds understood by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    StreamableHttp,
    Sse,
    WebSocket,
}

impl TransportKind {
    /// Parse a configured transport name.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "stdio" => Some(Self::Stdio),
            "streamable_http" | "streamable-http" | "http" => Some(Self::StreamableHttp),
            "sse" => Some(Self::Sse),
            "websocket" | "ws" => Some(Self::WebSocket),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::StreamableHttp => write!(f, "streamable_http"),
            Self::Sse => write!(f, "sse"),
            Self::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Typed connection parameters, one variant per transport kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    StreamableHttp {
        url: Url,
        headers: HashMap<String, String>,
        session_id: Option<String>,
        timeout: Option<Duration>,
        read_timeout: Option<Duration>,
        terminate_on_close: bool,
    },
    Sse {
        url: Url,
        headers: HashMap<String, String>,
        timeout: Option<Duration>,
        read_timeout: Option<Duration>,
    },
    WebSocket {
        url: Url,
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::StreamableHttp { .. } => TransportKind::StreamableHttp,
            Self::Sse { .. } => TransportKind::Sse,
            Self::WebSocket { .. } => TransportKind::WebSocket,
        }
    }
}

/// Immutable, validated configuration of one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub name: String,
    pub transport: TransportConfig,
}

impl ServerConfig {
    /// Resolve a raw entry into typed configuration.
    ///
    /// Performs no I/O. Fails with `UnsupportedTransport` for an unknown
    /// kind and `Configuration` when a required field is missing.
    pub fn resolve(name: &str, entry: &ServerEntry) -> Result<Self, McpError> {
        let kind = TransportKind::parse(&entry.transport).ok_or_else(|| {
            McpError::UnsupportedTransport {
                server: name.to_string(),
                kind: entry.transport.clone(),
            }
        })?;

        let headers = entry.headers.clone().unwrap_or_default();
        // Zero means unset, so the transport default applies.
        let timeout = entry
            .http_timeout_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        let read_timeout = entry
            .read_timeout_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs);

        let transport = match kind {
            TransportKind::Stdio => {
                let command = entry
                    .command
                    .clone()
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| {
                        McpError::configuration(format!("server {} has no command", name))
                    })?;
                TransportConfig::Stdio {
                    command,
                    args: entry.args.clone(),
                    env: entry.env.clone().unwrap_or_default(),
                }
            }
            TransportKind::StreamableHttp => TransportConfig::StreamableHttp {
                url: parse_url(name, entry)?,
                headers,
                session_id: entry.session_id.clone(),
                timeout,
                read_timeout,
                terminate_on_close: entry.terminate_on_close.unwrap_or(true),
            },
            TransportKind::Sse => TransportConfig::Sse {
                url: parse_url(name, entry)?,
                headers,
                timeout,
                read_timeout,
            },
            TransportKind::WebSocket => TransportConfig::WebSocket {
                url: parse_url(name, entry)?,
                headers,
            },
        };

        Ok(Self {
            name: name.to_string(),
            transport,
        })
    }
}

fn parse_url(name: &str, entry: &ServerEntry) -> Result<Url, McpError> {
    let raw = entry
        .url
        .as_deref()
        .ok_or_else(|| McpError::configuration(format!("server {} has no url", name)))?;
    Url::parse(raw)
        .map_err(|e| McpError::configuration(format!("server {} has invalid url {}: {}", name, raw, e)))
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    mcp: McpSection,
}

#[derive(Debug, Default, Deserialize)]
struct McpSection {
    #[serde(default)]
    servers: HashMap<String, ServerEntry>,
}

/// Parse the server section of a configuration document.
pub fn parse_server_file(contents: &str) -> Result<HashMap<String, ServerEntry>, McpError> {
    let file: ConfigFile = serde_json::from_str(contents)
        .map_err(|e| McpError::configuration(format!("invalid server file: {}", e)))?;
    Ok(file.mcp.servers)
}

/// Read the server section of a configuration file.
pub async fn load_server_file(path: &Path) -> Result<HashMap<String, ServerEntry>, McpError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        McpError::configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    let servers = parse_server_file(&contents)?;
    debug!(path = %path.display(), count = servers.len(), "Loaded server file");
    Ok(servers)
}

/// Overlay stored records on file records. Stored records win.
pub fn merge_servers(
    mut file: HashMap<String, ServerEntry>,
    stored: impl IntoIterator<Item = (String, ServerEntry)>,
) -> HashMap<String, ServerEntry> {
    for (name, entry) in stored {
        file.insert(name, entry);
    }
    file
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_aliases() {
        assert_eq!(TransportKind::parse("stdio"), Some(TransportKind::Stdio));
        assert_eq!(TransportKind::parse("http"), Some(TransportKind::StreamableHttp));
        assert_eq!(TransportKind::parse("streamable-http"), Some(TransportKind::StreamableHttp));
        assert_eq!(TransportKind::parse("streamable_http"), Some(TransportKind::StreamableHttp));
        assert_eq!(TransportKind::parse("sse"), Some(TransportKind::Sse));
        assert_eq!(TransportKind::parse("websocket"), Some(TransportKind::WebSocket));
        assert_eq!(TransportKind::parse("grpc"), None);
    }

    #[test]
    fn test_parse_server_file() {
        let servers = parse_server_file(
            r#"{
                "mcp": {
                    "servers": {
                        "files": {"transport": "stdio", "command": "mcp-files", "args": ["--root", "/tmp"]},
                        "search": {"transport": "http", "url": "http://localhost:8080/mcp", "http_timeout_seconds": 10}
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers["files"].args, vec!["--root", "/tmp"]);
        assert_eq!(servers["search"].http_timeout_seconds, Some(10));
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        assert!(matches!(parse_server_file("not json"), Err(McpError::Configuration(_))));
        assert!(matches!(parse_server_file("[1, 2]"), Err(McpError::Configuration(_))));
    }

    #[test]
    fn test_missing_sections_mean_no_servers() {
        assert!(parse_server_file("{}").unwrap().is_empty());
        assert!(parse_server_file(r#"{"servers": {}}"#).unwrap().is_empty());
        assert!(parse_server_file(r#"{"mcp": {}}"#).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_streamable_http() {
        let mut entry = ServerEntry::remote("streamable-http", "http://localhost:9000/mcp")
            .with_header("Authorization", "Bearer t");
        entry.session_id = Some("abc".to_string());
        entry.read_timeout_seconds = Some(20);

        let config = ServerConfig::resolve("search", &entry).unwrap();
        match config.transport {
            TransportConfig::StreamableHttp {
                session_id,
                timeout,
                read_timeout,
                terminate_on_close,
                headers,
                ..
            } => {
                assert_eq!(session_id.as_deref(), Some("abc"));
                assert_eq!(timeout, None);
                assert_eq!(read_timeout, Some(Duration::from_secs(20)));
                assert!(terminate_on_close);
                assert_eq!(headers["Authorization"], "Bearer t");
            }
            other => panic!("unexpected transport {:?}", other),
        }
    }

    #[test]
    fn test_resolve_zero_timeouts_as_unset() {
        let mut entry = ServerEntry::remote("sse", "http://localhost:9000/sse");
        entry.http_timeout_seconds = Some(0);
        entry.read_timeout_seconds = Some(0);

        let config = ServerConfig::resolve("events", &entry).unwrap();
        match config.transport {
            TransportConfig::Sse {
                timeout,
                read_timeout,
                ..
            } => {
                assert_eq!(timeout, None);
                assert_eq!(read_timeout, None);
            }
            other => panic!("unexpected transport {:?}", other),
        }
    }

    #[test]
    fn test_resolve_unknown_transport() {
        let entry = ServerEntry::remote("carrier-pigeon", "http://localhost");
        let err = ServerConfig::resolve("odd", &entry).unwrap_err();
        assert!(matches!(err, McpError::UnsupportedTransport { ref kind, .. } if kind == "carrier-pigeon"));
    }

    #[test]
    fn test_resolve_missing_fields() {
        let entry = ServerEntry {
            transport: "stdio".to_string(),
            ..Default::default()
        };
        assert!(matches!(ServerConfig::resolve("a", &entry), Err(McpError::Configuration(_))));

        let entry = ServerEntry::remote("sse", "not a url");
        assert!(matches!(ServerConfig::resolve("b", &entry), Err(McpError::Configuration(_))));
    }

    #[test]
    fn test_merge_prefers_stored_records() {
        let mut file = HashMap::new();
        file.insert("a".to_string(), ServerEntry::stdio("from-file", vec![]));
        file.insert("b".to_string(), ServerEntry::stdio("only-file", vec![]));

        let merged = merge_servers(
            file,
            vec![("a".to_string(), ServerEntry::stdio("from-store", vec![]))],
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged["a"].command.as_deref(), Some("from-store"));
        assert_eq!(merged["b"].command.as_deref(), Some("only-file"));
    }
}
