//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Analytics Send - deliver analytics events to the data plane
#[derive(Parser, Debug)]
#[command(
    name = "analytics-send",
    author,
    version,
    about = "Batch and deliver analytics events",
    long_about = "Reads analytics events (one JSON object per line), batches them, \n\
                  routes them to data plane shards, and reports the delivery outcome."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "ANALYTICS_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "ANALYTICS_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this port
    #[arg(long, global = true, env = "ANALYTICS_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deliver events read from a file or stdin
    Send(SendArgs),

    /// Validate configuration file without sending
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `send` command
#[derive(Parser, Debug, Clone)]
pub struct SendArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "analytics.toml",
        env = "ANALYTICS_CONFIG"
    )]
    pub config: PathBuf,

    /// NDJSON event file ("-" or omitted reads stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Override the write key from configuration
    #[arg(long, env = "ANALYTICS_WRITE_KEY", hide_env_values = true)]
    pub write_key: Option<String>,

    /// Override the data plane endpoint from configuration
    #[arg(long, env = "ANALYTICS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Stop after this many events (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub limit: u64,

    /// Parse and validate events without delivering them
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "analytics.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "analytics.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
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
    fn test_send_overrides() {
        let cli = Cli::try_parse_from([
            "analytics-send",
            "-v",
            "send",
            "--config",
            "cfg.toml",
            "--input",
            "events.ndjson",
            "--endpoint",
            "http://localhost:8080",
            "--limit",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Send(args) => {
                assert_eq!(args.config, PathBuf::from("cfg.toml"));
                assert_eq!(args.input, Some(PathBuf::from("events.ndjson")));
                assert_eq!(args.endpoint.as_deref(), Some("http://localhost:8080"));
                assert_eq!(args.limit, 5);
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["analytics-send", "-q", "-v", "info"]);
        assert!(result.is_err());
    }
}
