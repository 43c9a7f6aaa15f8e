//! Event delivery pipeline.

mod feeder;
mod stats;

pub use feeder::{SendConfig, SendPipeline};
pub use stats::{SendStats, StatsObserver};
