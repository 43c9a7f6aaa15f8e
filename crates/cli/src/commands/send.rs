//! `send` command implementation.

use anyhow::{Context, Result};
use contracts::Settings;
use tracing::{info, warn};

use crate::cli::SendArgs;
use crate::error::CliError;
use crate::pipeline::{SendConfig, SendPipeline};

/// Execute the `send` command
pub async fn run_send(args: &SendArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let settings = load_settings(args)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        endpoint = %settings.engine.endpoint,
        batch_size = settings.engine.batch_size,
        flush_interval_ms = settings.engine.flush_interval_ms,
        max_concurrent_requests = settings.engine.max_concurrent_requests,
        dry_run = args.dry_run,
        "Configuration loaded"
    );

    let pipeline = SendPipeline::new(SendConfig {
        settings,
        input: args.input.clone(),
        limit: (args.limit > 0).then_some(args.limit),
        dry_run: args.dry_run,
    });

    let observer = pipeline.observer();
    let stats = match pipeline.run(shutdown_signal()).await {
        Ok(stats) => stats,
        Err(e) => {
            let delivery = observer.summary();
            warn!(
                delivered = delivery.delivered,
                failed = delivery.failed,
                "Send aborted after draining enqueued events"
            );
            return Err(e).context("Event delivery failed");
        }
    };

    info!(
        enqueued = stats.enqueued,
        delivered = stats.delivery.delivered,
        failed = stats.delivery.failed,
        duration_secs = stats.duration.as_secs_f64(),
        "Send finished"
    );
    stats.print_summary();

    if !stats.all_delivered() {
        let undelivered = stats.rejected + stats.delivery.failed + stats.engine.outstanding();
        anyhow::bail!("{undelivered} events were not delivered");
    }
    Ok(())
}

/// Load settings and apply CLI overrides before validating
fn load_settings(args: &SendArgs) -> crate::error::Result<Settings> {
    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()));
    }

    let mut settings = config_loader::ConfigLoader::parse_from_path(&args.config)?;

    if let Some(ref write_key) = args.write_key {
        info!("Overriding write key from CLI");
        settings.write_key = write_key.clone();
    }
    if let Some(ref endpoint) = args.endpoint {
        info!(endpoint = %endpoint, "Overriding endpoint from CLI");
        settings.engine.endpoint = endpoint.clone();
    }

    config_loader::ConfigLoader::validate(&settings)?;
    Ok(settings)
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn args(config: PathBuf) -> SendArgs {
        SendArgs {
            config,
            input: None,
            write_key: None,
            endpoint: None,
            limit: 0,
            dry_run: true,
        }
    }

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_overrides_applied_before_validation() {
        let file = config_file("[engine]\nbatch_size = 10\n");
        let mut args = args(file.path().to_path_buf());
        args.write_key = Some("cli-key".to_string());
        args.endpoint = Some("http://localhost:8080".to_string());

        let settings = load_settings(&args).unwrap();
        assert_eq!(settings.write_key, "cli-key");
        assert_eq!(settings.engine.endpoint, "http://localhost:8080");
        assert_eq!(settings.engine.batch_size, 10);
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        let file = config_file("write_key = \"k\"\n[engine]\n");
        let err = load_settings(&args(file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("endpoint"), "got: {err}");
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_settings(&args(PathBuf::from("/no/such/analytics.toml"))).unwrap_err();
        assert!(matches!(err, CliError::ConfigNotFound { .. }));
    }
}
