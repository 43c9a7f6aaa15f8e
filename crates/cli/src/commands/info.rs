//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{EngineConfig, Settings, LIBRARY_NAME, LIBRARY_VERSION};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    library: String,
    user_agent: String,
    write_key: String,
    engine: EngineConfig,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let settings = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&settings);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&settings);
    }

    Ok(())
}

/// Keep the first and last two characters of the write key
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 4))
}

fn build_config_info(settings: &Settings) -> ConfigInfo {
    ConfigInfo {
        version: format!("{:?}", settings.version),
        library: format!("{LIBRARY_NAME} {LIBRARY_VERSION}"),
        user_agent: dispatcher::transport::user_agent(),
        write_key: mask_key(&settings.write_key),
        engine: settings.engine.clone(),
    }
}

fn print_config_info(settings: &Settings) {
    let engine = &settings.engine;

    println!("=== Analytics Configuration ===\n");

    println!("Client");
    println!("   Version: {:?}", settings.version);
    println!("   Library: {} {}", LIBRARY_NAME, LIBRARY_VERSION);
    println!("   Write key: {}", mask_key(&settings.write_key));
    println!("   Endpoint: {}", engine.endpoint);

    println!("\nBatching");
    println!("   Batch size: {}", engine.batch_size);
    println!("   Max batch bytes: {}", engine.max_batch_bytes);
    println!("   Max message bytes: {}", engine.max_message_bytes);
    println!("   Flush interval: {} ms", engine.flush_interval_ms);
    println!("   Channel capacity: {}", engine.channel_capacity);

    println!("\nDelivery");
    println!("   Upload slots: {}", engine.max_concurrent_requests);
    println!("   Request timeout: {} ms", engine.request_timeout_ms);
    println!("   Gzip: {}", if engine.disable_gzip { "off" } else { "on" });
    println!(
        "   Shard routing: {}",
        if engine.no_proxy_support { "off" } else { "on" }
    );
    println!(
        "   Retry: {} ms x{} (max {} ms)",
        engine.retry.initial_delay_ms, engine.retry.multiplier, engine.retry.max_delay_ms
    );
    println!(
        "   Topology backoff: {} ms step (max {} ms)",
        engine.topology_backoff_step_ms, engine.topology_backoff_max_ms
    );

    println!();
}
