//! Engine configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ContractError;

/// Length of the empty batch envelope `{"batch":[]}`
pub const ENVELOPE_OVERHEAD: usize = 12;

/// Dispatch engine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data plane base URL (`<endpoint>/v1/batch`, `<endpoint>/cluster-info`)
    #[serde(default)]
    pub endpoint: String,

    /// Flush timer period in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Maximum messages per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum serialized bytes per batch, envelope included
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,

    /// Maximum serialized bytes of a single message
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Upload slots
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Admission channel capacity
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Per-request HTTP timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Send uncompressed bodies
    #[serde(default)]
    pub disable_gzip: bool,

    /// Omit shard routing headers and never query cluster-info up front
    #[serde(default)]
    pub no_proxy_support: bool,

    /// Backoff between retries of a failed upload
    #[serde(default)]
    pub retry: RetryConfig,

    /// Topology-change backoff step in milliseconds
    #[serde(default = "default_topology_backoff_step_ms")]
    pub topology_backoff_step_ms: u64,

    /// Topology-change backoff cap in milliseconds
    #[serde(default = "default_topology_backoff_max_ms")]
    pub topology_backoff_max_ms: u64,
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_batch_size() -> usize {
    250
}

fn default_max_batch_bytes() -> usize {
    500_000
}

fn default_max_message_bytes() -> usize {
    32_000
}

fn default_max_concurrent_requests() -> usize {
    1_000
}

fn default_channel_capacity() -> usize {
    100
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_topology_backoff_step_ms() -> u64 {
    5_000
}

fn default_topology_backoff_max_ms() -> u64 {
    300_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            flush_interval_ms: default_flush_interval_ms(),
            batch_size: default_batch_size(),
            max_batch_bytes: default_max_batch_bytes(),
            max_message_bytes: default_max_message_bytes(),
            max_concurrent_requests: default_max_concurrent_requests(),
            channel_capacity: default_channel_capacity(),
            request_timeout_ms: default_request_timeout_ms(),
            disable_gzip: false,
            no_proxy_support: false,
            retry: RetryConfig::default(),
            topology_backoff_step_ms: default_topology_backoff_step_ms(),
            topology_backoff_max_ms: default_topology_backoff_max_ms(),
        }
    }
}

impl EngineConfig {
    /// Config pointing at `endpoint` with every other field defaulted
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Byte budget available to messages inside one envelope
    pub fn batch_payload_bytes(&self) -> usize {
        self.max_batch_bytes.saturating_sub(ENVELOPE_OVERHEAD)
    }

    /// Sleep before re-sending after the `round`-th topology change (1-based)
    ///
    /// Zero on the first change, then grows by one step per round up to the cap.
    pub fn topology_backoff(&self, round: u32) -> Duration {
        let step = self
            .topology_backoff_step_ms
            .saturating_mul(u64::from(round.saturating_sub(1)));
        Duration::from_millis(step.min(self.topology_backoff_max_ms))
    }

    /// Check every tunable
    ///
    /// # Errors
    /// Returns the first invalid field
    pub fn validate(&self) -> Result<(), ContractError> {
        self.validate_endpoint()?;
        self.validate_limits()?;
        self.validate_timing()?;
        self.retry.validate()?;
        Ok(())
    }

    fn validate_endpoint(&self) -> Result<(), ContractError> {
        if self.endpoint.is_empty() {
            return Err(ContractError::config_validation(
                "endpoint",
                "endpoint cannot be empty",
            ));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ContractError::config_validation(
                "endpoint",
                format!("endpoint must be an http(s) URL, got '{}'", self.endpoint),
            ));
        }
        Ok(())
    }

    fn validate_limits(&self) -> Result<(), ContractError> {
        if self.batch_size == 0 {
            return Err(ContractError::config_validation(
                "batch_size",
                "batch_size must be > 0",
            ));
        }
        if self.max_batch_bytes <= ENVELOPE_OVERHEAD {
            return Err(ContractError::config_validation(
                "max_batch_bytes",
                format!(
                    "max_batch_bytes must be > {ENVELOPE_OVERHEAD}, got {}",
                    self.max_batch_bytes
                ),
            ));
        }
        if self.max_message_bytes == 0 || self.max_message_bytes > self.batch_payload_bytes() {
            return Err(ContractError::config_validation(
                "max_message_bytes",
                format!(
                    "max_message_bytes must be in 1..={}, got {}",
                    self.batch_payload_bytes(),
                    self.max_message_bytes
                ),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ContractError::config_validation(
                "max_concurrent_requests",
                "max_concurrent_requests must be > 0",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ContractError::config_validation(
                "channel_capacity",
                "channel_capacity must be > 0",
            ));
        }
        Ok(())
    }

    fn validate_timing(&self) -> Result<(), ContractError> {
        if self.flush_interval_ms == 0 {
            return Err(ContractError::config_validation(
                "flush_interval_ms",
                "flush_interval_ms must be > 0",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ContractError::config_validation(
                "request_timeout_ms",
                "request_timeout_ms must be > 0",
            ));
        }
        if self.topology_backoff_step_ms > self.topology_backoff_max_ms {
            return Err(ContractError::config_validation(
                "topology_backoff_step_ms / topology_backoff_max_ms",
                format!(
                    "topology_backoff_step_ms ({}) must be <= topology_backoff_max_ms ({})",
                    self.topology_backoff_step_ms, self.topology_backoff_max_ms
                ),
            ));
        }
        Ok(())
    }
}

/// Exponential retry backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay after the first failed attempt
    pub initial_delay_ms: u64,
    /// Upper bound of any delay
    pub max_delay_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after failed attempt `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    fn validate(&self) -> Result<(), ContractError> {
        if !(self.multiplier >= 1.0) {
            return Err(ContractError::config_validation(
                "retry.multiplier",
                format!("multiplier must be >= 1.0, got {}", self.multiplier),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ContractError::config_validation(
                "retry.initial_delay_ms / retry.max_delay_ms",
                format!(
                    "initial_delay_ms ({}) must be <= max_delay_ms ({})",
                    self.initial_delay_ms, self.max_delay_ms
                ),
            ));
        }
        Ok(())
    }
}
