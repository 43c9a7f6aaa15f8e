//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::Settings;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Flush intervals above this are reported as a warning
const SLOW_FLUSH_MS: u64 = 60_000;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    endpoint: String,
    batch_size: usize,
    flush_interval_ms: u64,
    max_concurrent_requests: usize,
    gzip: bool,
    shard_routing: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(settings) => {
            let warnings = collect_warnings(&settings);
            let engine = &settings.engine;

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", settings.version),
                    endpoint: engine.endpoint.clone(),
                    batch_size: engine.batch_size,
                    flush_interval_ms: engine.flush_interval_ms,
                    max_concurrent_requests: engine.max_concurrent_requests,
                    gzip: !engine.disable_gzip,
                    shard_routing: !engine.no_proxy_support,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(settings: &Settings) -> Vec<String> {
    let engine = &settings.engine;
    let mut warnings = Vec::new();

    if engine.endpoint.starts_with("http://") {
        warnings.push("endpoint is not TLS - the write key is sent in clear text".to_string());
    }

    if engine.flush_interval_ms > SLOW_FLUSH_MS {
        warnings.push(format!(
            "flush_interval_ms is {} - partial batches wait over a minute",
            engine.flush_interval_ms
        ));
    }

    if engine.max_concurrent_requests == 1 {
        warnings.push(
            "max_concurrent_requests is 1 - batches flushed during an upload fail with a capacity error"
                .to_string(),
        );
    }

    if engine.disable_gzip {
        warnings.push("gzip is disabled - request bodies are sent uncompressed".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Endpoint: {}", summary.endpoint);
            println!("  Batch size: {}", summary.batch_size);
            println!("  Flush interval: {} ms", summary.flush_interval_ms);
            println!("  Upload slots: {}", summary.max_concurrent_requests);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
