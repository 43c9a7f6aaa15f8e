//! # Dispatcher
//!
//! Asynchronous dispatch engine for analytics events.
//!
//! Responsibilities:
//! - Admit validated messages through a bounded channel
//! - Accumulate them into count/byte-bounded batches
//! - Partition batches across backend shards
//! - Upload under bounded concurrency, retrying and re-sharding on failure
//! - Drain outstanding work on shutdown
//!
//! # Example
//!
//! ```no_run
//! use contracts::{EngineConfig, Track};
//! use dispatcher::Client;
//!
//! # async fn example() -> Result<(), dispatcher::DispatcherError> {
//! let client = Client::builder("write-key", EngineConfig::with_endpoint("https://hosted.example.com"))
//!     .build()?;
//! client
//!     .enqueue(Track {
//!         event: "Signed Up".into(),
//!         user_id: "user-1".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod client;
pub mod codec;
mod coordinator;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod notify;
pub mod sender;
pub mod shard;
pub mod topology;
pub mod transport;

#[cfg(test)]
mod testing;

pub use batch::MessageQueue;
pub use client::{Client, ClientBuilder, Clock, IdGenerator};
pub use codec::{BatchEncoder, JsonEnvelope, QueuedMessage};
pub use coordinator::EngineState;
pub use error::DispatcherError;
pub use executor::UploadExecutor;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use notify::{Notifier, Observer};
pub use sender::{PendingRequest, RetryAfter, Sender};
pub use topology::{RefreshOutcome, Topology, TopologyResolver};
pub use transport::{
    ClusterInfo, HttpTransport, ShardTarget, Transport, TransportError, UploadRequest,
    UploadResponse,
};
