//! # toolhub-core
//!
//! Shared building blocks for Toolhub.
//!
//! This crate provides:
//! - Layered settings (defaults, user file, project file, environment)
//! - The top-level error type with recovery suggestions

pub mod config;
pub mod error;

pub use config::{LoggingSettings, McpSettings, Settings};
pub use error::{format_error_with_suggestion, Error, Result};
