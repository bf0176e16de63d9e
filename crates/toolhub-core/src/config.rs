//! Settings for Toolhub.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Top-level settings, merged from every configuration source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Tool server connection settings
    pub mcp: McpSettings,
    /// Log output settings
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    /// Path of the JSON file listing tool servers
    pub config_path: PathBuf,
    /// Seconds to wait for connections to close before cancelling them
    pub shutdown_grace_secs: u64,
    /// Seconds to wait for a single protocol response
    pub request_timeout_secs: u64,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("./mcp.json"),
            shutdown_grace_secs: 5,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive: trace, debug, info, warn, error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Field path (e.g., "mcp.shutdown_grace_secs")
    pub field: String,
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Settings {
    /// Load settings from all standard sources.
    ///
    /// Later sources override earlier ones: built-in defaults, the user
    /// config file, `./toolhub.toml`, then `TOOLHUB_*` environment
    /// variables (`TOOLHUB_MCP__CONFIG_PATH` sets `mcp.config_path`).
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(None).extract()
    }

    /// Load settings with an explicit file layered over the standard files.
    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        Self::figment(Some(path)).extract()
    }

    fn figment(extra: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file("toolhub.toml"));

        if let Some(path) = extra {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed("TOOLHUB_").split("__"))
    }

    /// Load and validate settings.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, Error> {
        let settings = match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
        .map_err(|e| Error::Config(e.to_string()))?;

        let result = settings.validate();
        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.mcp.config_path.as_os_str().is_empty() {
            result.add_error("mcp.config_path", "config_path cannot be empty");
        }

        if self.mcp.request_timeout_secs == 0 {
            result.add_error("mcp.request_timeout_secs", "request_timeout_secs must be greater than 0");
        }

        if self.mcp.shutdown_grace_secs == 0 {
            result.add_warning(
                "mcp.shutdown_grace_secs",
                "shutdown_grace_secs is 0, connections will be cancelled without waiting",
            );
        } else if self.mcp.shutdown_grace_secs > 120 {
            result.add_warning("mcp.shutdown_grace_secs", "shutdown_grace_secs is very high (> 120s)");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            result.add_error(
                "logging.level",
                format!("Invalid log level '{}'. Valid values: {:?}", self.logging.level, valid_levels),
            );
        }

        result
    }

    /// Render the settings as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("toolhub"))
            .unwrap_or_else(|| PathBuf::from("~/.config/toolhub"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        let result = settings.validate();
        assert!(result.is_ok(), "Default settings should be valid: {:?}", result.issues);
        assert_eq!(settings.mcp.shutdown_grace_secs, 5);
        assert_eq!(settings.mcp.config_path, PathBuf::from("./mcp.json"));
    }

    #[test]
    fn test_zero_request_timeout_is_error() {
        let mut settings = Settings::default();
        settings.mcp.request_timeout_secs = 0;
        let result = settings.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "mcp.request_timeout_secs"));
    }

    #[test]
    fn test_zero_grace_is_warning() {
        let mut settings = Settings::default();
        settings.mcp.shutdown_grace_secs = 0;
        let result = settings.validate();
        assert!(result.is_ok());
        assert!(result.warnings().iter().any(|e| e.field == "mcp.shutdown_grace_secs"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.logging.level = "loud".to_string();
        let result = settings.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[mcp]\nconfig_path = \"/etc/toolhub/servers.json\"\nshutdown_grace_secs = 2\n"
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.mcp.config_path, PathBuf::from("/etc/toolhub/servers.json"));
        assert_eq!(settings.mcp.shutdown_grace_secs, 2);
        assert_eq!(settings.mcp.request_timeout_secs, 60);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_to_toml_contains_sections() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("[mcp]"));
        assert!(rendered.contains("[logging]"));
    }
}
