//! Dispatcher error types

use thiserror::Error;

use crate::transport::TransportError;

/// Dispatcher-specific errors
///
/// Construction and admission errors are returned to the caller directly.
/// Everything after admission reaches the caller through the `Observer`.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Invalid tunables, no engine produced
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed message, rejected at admission
    #[error("invalid message: {0}")]
    Validation(#[from] contracts::ContractError),

    /// Admission after shutdown, or a second close
    #[error("client is closed")]
    Closed,

    /// Batch or message could not be encoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A single message exceeds the per-message limit
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooBig { size: usize, max: usize },

    /// Network-layer failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Non-2xx response
    #[error("unexpected response {status}: {body}")]
    Response { status: u16, body: String },

    /// The backend kept reporting a topology change until the ceiling
    #[error("cluster topology changed, gave up after {rounds} rounds")]
    TopologyChanged { rounds: u32 },

    /// Node count never became known
    #[error("cluster node count unknown after {attempts} attempts")]
    TopologyUnknown { attempts: u32 },

    /// Upload executor saturated
    #[error("upload capacity exhausted, batch dropped")]
    Capacity,
}

impl DispatcherError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a serialization error
    pub fn serialization(message: impl std::fmt::Display) -> Self {
        Self::Serialization(message.to_string())
    }

    /// Create a response error
    pub fn response(status: u16, body: impl Into<String>) -> Self {
        Self::Response {
            status,
            body: body.into(),
        }
    }

    /// Metric label of a terminal failure
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Serialization(_) => "serialization",
            Self::MessageTooBig { .. } => "too_big",
            Self::Transport(_) => "transport",
            Self::Response { .. } => "response",
            Self::TopologyChanged { .. } => "topology_changed",
            Self::TopologyUnknown { .. } => "topology_unknown",
            Self::Closed => "closed",
            Self::Config(_) | Self::Validation(_) => "invalid",
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Response { .. }
                | Self::TopologyChanged { .. }
                | Self::TopologyUnknown { .. }
        )
    }
}
