//! Event feeder - reads NDJSON events and hands them to the client.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use contracts::{Message, Settings};
use dispatcher::Client;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::{SendStats, StatsObserver};
use crate::error::{CliError, Result};

/// Send pipeline configuration
#[derive(Debug, Clone)]
pub struct SendConfig {
    /// Validated client settings
    pub settings: Settings,

    /// NDJSON input (None = stdin)
    pub input: Option<PathBuf>,

    /// Maximum number of events to enqueue (None = unlimited)
    pub limit: Option<u64>,

    /// Parse events without building a client
    pub dry_run: bool,
}

/// Reads events line by line and delivers them through a [`Client`]
pub struct SendPipeline {
    config: SendConfig,
    observer: Arc<StatsObserver>,
}

impl SendPipeline {
    pub fn new(config: SendConfig) -> Self {
        Self {
            config,
            observer: Arc::new(StatsObserver::default()),
        }
    }

    /// Delivery outcomes, readable while and after the pipeline runs
    pub fn observer(&self) -> Arc<StatsObserver> {
        Arc::clone(&self.observer)
    }

    /// Run until the input is exhausted, the limit is hit, or `shutdown` fires
    ///
    /// The client is always closed before returning, even when reading the
    /// input fails, so every enqueued event reaches a terminal outcome.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<SendStats> {
        let start_time = Instant::now();
        let mut lines = open_input(self.config.input.as_ref()).await?.lines();

        let observer = self.observer;
        let client = if self.config.dry_run {
            None
        } else {
            let settings = self.config.settings.clone();
            Some(
                Client::builder(settings.write_key, settings.engine)
                    .observer(observer.clone())
                    .build()?,
            )
        };

        let mut stats = SendStats::default();
        let mut read_error = None;
        tokio::pin!(shutdown);

        loop {
            if self.config.limit.is_some_and(|limit| stats.enqueued >= limit) {
                info!(limit = stats.enqueued, "Event limit reached");
                break;
            }

            let line = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!("Shutdown requested, draining enqueued events");
                    break;
                }
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(line = stats.lines_read + 1, error = %e, "Failed to read input");
                    read_error = Some(e);
                    break;
                }
            };
            stats.lines_read += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let message = match parse_event(trimmed, stats.lines_read) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Skipping invalid event");
                    stats.rejected += 1;
                    continue;
                }
            };

            match &client {
                Some(client) => match client.enqueue(message).await {
                    Ok(()) => stats.enqueued += 1,
                    Err(e) => {
                        warn!(line = stats.lines_read, error = %e, "Event rejected");
                        stats.rejected += 1;
                    }
                },
                None => match message.validate() {
                    Ok(()) => stats.enqueued += 1,
                    Err(e) => {
                        warn!(line = stats.lines_read, error = %e, "Event rejected");
                        stats.rejected += 1;
                    }
                },
            }
        }

        if let Some(client) = client {
            debug!(enqueued = stats.enqueued, "Closing client");
            client.close().await?;
            stats.engine = client.metrics();
        }

        if let Some(e) = read_error {
            return Err(e.into());
        }

        stats.duration = start_time.elapsed();
        stats.delivery = observer.summary();
        Ok(stats)
    }
}

/// Parse one NDJSON line into a message
///
/// # Errors
/// Returns [`CliError::InvalidEvent`] naming the 1-based line number
pub fn parse_event(line: &str, line_number: u64) -> Result<Message> {
    serde_json::from_str(line).map_err(|e| CliError::invalid_event(line_number, e.to_string()))
}

async fn open_input(
    input: Option<&PathBuf>,
) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            if !path.exists() {
                return Err(CliError::input_not_found(path.display().to_string()));
            }
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}
