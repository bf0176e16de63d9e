//! Subprocess transport.
//!
//! Spawns the server as a child process and exchanges newline-delimited
//! JSON over its stdin/stdout. Stderr is inherited so server diagnostics
//! reach the operator.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Connector, Transport};
use crate::config::TransportKind;
use crate::error::TransportError;

#[cfg(unix)]
const DEFAULT_INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

#[cfg(windows)]
const DEFAULT_INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// The part of the parent environment every child server receives.
///
/// Values that look like shell functions are skipped.
pub fn default_environment() -> HashMap<String, String> {
    DEFAULT_INHERITED_ENV_VARS
        .iter()
        .filter_map(|key| {
            let value = std::env::var(key).ok()?;
            if value.starts_with("()") {
                return None;
            }
            Some((key.to_string(), value))
        })
        .collect()
}

/// Configured, not yet spawned, subprocess server.
pub struct StdioConnector {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioConnector {
    /// Overrides win over the default environment.
    pub fn new(command: String, args: Vec<String>, overrides: &HashMap<String, String>) -> Self {
        let mut env = default_environment();
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { command, args, env }
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }
}

#[async_trait]
impl Connector for StdioConnector {
    async fn open(self: Box<Self>) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = StdioTransport::spawn(&self.command, &self.args, &self.env)?;
        Ok(Arc::new(transport))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}

/// Standard I/O transport for subprocess servers.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Spawn the server process with exactly the given environment.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        debug!(command = command, args = ?args, "Spawning MCP server process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdout"))
        })?;

        debug!(pid = ?child.id(), "MCP server process spawned");

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            connected: AtomicBool::new(true),
        })
    }

    /// Get the process ID of the child process.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;
        stdin.write_all(b"\n").await.map_err(TransportError::WriteError)?;
        stdin.flush().await.map_err(TransportError::WriteError)?;

        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut stdout = self.stdout.lock().await;
        loop {
            if !self.is_connected() {
                return Err(TransportError::NotConnected);
            }

            let mut line = String::new();
            let bytes_read = stdout
                .read_line(&mut line)
                .await
                .map_err(TransportError::ReadError)?;

            if bytes_read == 0 {
                self.connected.store(false, Ordering::SeqCst);
                return Err(TransportError::ConnectionClosed);
            }

            let message = line.trim_end();
            if !message.is_empty() {
                return Ok(message.to_string());
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Closing stdin first lets well-behaved servers exit on EOF.
        let _ = self.stdin.lock().await.shutdown().await;
        self.connected.store(false, Ordering::SeqCst);

        let mut child = self.child.lock().await;
        if matches!(child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }

        let Some(pid) = child.id() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            debug!(pid = pid, "Sending SIGTERM to MCP server");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

            tokio::select! {
                _ = child.wait() => {
                    debug!("MCP server exited gracefully");
                }
                _ = tokio::time::sleep(TERMINATE_GRACE) => {
                    warn!(pid = pid, "MCP server did not exit gracefully, killing");
                    let _ = child.kill().await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            debug!(pid = pid, "Killing MCP server");
            let _ = child.kill().await;
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert("PATH".to_string(), "/opt/bin".to_string());
        overrides.insert("API_TOKEN".to_string(), "secret".to_string());

        let connector = StdioConnector::new("srv".to_string(), vec![], &overrides);
        assert_eq!(connector.env()["PATH"], "/opt/bin");
        assert_eq!(connector.env()["API_TOKEN"], "secret");
    }

    #[cfg(unix)]
    #[test]
    fn test_default_environment_is_restricted() {
        let env = default_environment();
        assert!(env.keys().all(|k| DEFAULT_INHERITED_ENV_VARS.contains(&k.as_str())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_transport_echo() {
        // 'cat' echoes each line back
        let transport = StdioTransport::spawn("cat", &[], &default_environment()).unwrap();
        assert!(transport.is_connected());

        transport.send(r#"{"test": "hello"}"#).await.unwrap();
        let response = transport.receive().await.unwrap();
        assert_eq!(response, r#"{"test": "hello"}"#);

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transport_not_connected_after_close() {
        let transport = StdioTransport::spawn("cat", &[], &default_environment()).unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert!(matches!(transport.send("test").await, Err(TransportError::NotConnected)));
        assert!(matches!(transport.receive().await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_spawn_missing_command() {
        let result = StdioTransport::spawn("/definitely/not/a/server", &[], &HashMap::new());
        assert!(matches!(result, Err(TransportError::SpawnFailed(_))));
    }
}
