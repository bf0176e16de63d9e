//! # toolhub-cli
//!
//! Command-line interface for the Toolhub connection manager.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toolhub_core::{format_error_with_suggestion, LoggingSettings, Settings};

mod commands;

/// Toolhub - connect to MCP tool servers and call their tools
#[derive(Parser)]
#[command(name = "toolhub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file layered over the standard locations
    #[arg(short, long, global = true, env = "TOOLHUB_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers without connecting
    Servers,
    /// Connect and list tools of one server, or of all
    Tools {
        /// Server name
        server: Option<String>,
    },
    /// Call a tool
    Call {
        /// Server name
        server: String,
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short, long, value_name = "JSON")]
        args: Option<String>,
    },
    /// Settings management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective settings
    Show,
    /// Check the settings and report problems
    Validate,
}

fn init_logging(logging: &LoggingSettings, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    // Logs go to stderr so command output stays pipeable.
    let (plain, json) = if logging.json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

fn report(error: &anyhow::Error) {
    match error.downcast_ref::<toolhub_core::Error>() {
        Some(e) => eprintln!("Error: {}", format_error_with_suggestion(e)),
        None => eprintln!("Error: {:#}", error),
    }
}

async fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    match cli.command {
        Commands::Config { action } => commands::config::handle(action, &settings, cli.json),
        Commands::Servers => commands::servers::run(&settings, cli.json).await,
        Commands::Tools { server } => commands::tools::run(&settings, server.as_deref(), cli.json).await,
        Commands::Call { server, tool, args } => {
            commands::call::run(&settings, &server, &tool, args.as_deref(), cli.json).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load_validated(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", format_error_with_suggestion(&e));
            return ExitCode::FAILURE;
        }
    };

    init_logging(&settings.logging, cli.verbose);

    match run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_call() {
        let cli = Cli::parse_from(["toolhub", "call", "files", "read", "--args", r#"{"path":"a"}"#, "-v"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Call { server, tool, args } => {
                assert_eq!(server, "files");
                assert_eq!(tool, "read");
                assert_eq!(args.as_deref(), Some(r#"{"path":"a"}"#));
            }
            _ => panic!("expected call"),
        }
    }
}
