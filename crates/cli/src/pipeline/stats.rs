//! Delivery statistics.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use contracts::Message;
use dispatcher::{DispatcherError, MetricsSnapshot, Observer};
use observability::{DeliveryAggregator, DeliverySummary};

/// Observer feeding delivery outcomes into an aggregator
#[derive(Debug, Default)]
pub struct StatsObserver {
    aggregator: Mutex<DeliveryAggregator>,
}

impl StatsObserver {
    pub fn summary(&self) -> DeliverySummary {
        match self.aggregator.lock() {
            Ok(aggregator) => aggregator.summary(),
            Err(poisoned) => poisoned.into_inner().summary(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut DeliveryAggregator)) {
        match self.aggregator.lock() {
            Ok(mut aggregator) => f(&mut aggregator),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl Observer for StatsObserver {
    fn on_success(&self, message: &Message) {
        let latency_ms = message.sent_at().and_then(|sent_at| {
            (Utc::now() - sent_at)
                .num_microseconds()
                .map(|us| us as f64 / 1_000.0)
        });
        self.update(|aggregator| aggregator.record_success(latency_ms));
    }

    fn on_failure(&self, message: &Message, error: &DispatcherError) {
        tracing::warn!(
            message_id = message.message_id(),
            error = %error,
            "Event delivery failed"
        );
        self.update(|aggregator| aggregator.record_failure(error.reason()));
    }
}

/// Statistics from a send run
#[derive(Debug, Clone, Default)]
pub struct SendStats {
    /// Input lines consumed (blank lines and comments included)
    pub lines_read: u64,

    /// Events accepted by the client
    pub enqueued: u64,

    /// Lines that were not valid events or were refused at admission
    pub rejected: u64,

    /// Total duration of the run, drain included
    pub duration: Duration,

    /// Terminal outcomes reported by the observer
    pub delivery: DeliverySummary,

    /// Engine counters at the end of the run
    pub engine: MetricsSnapshot,
}

impl SendStats {
    /// Delivered events per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.delivery.delivered as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Whether every enqueued event reached the backend
    pub fn all_delivered(&self) -> bool {
        self.rejected == 0 && self.delivery.failed == 0 && self.engine.outstanding() == 0
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Send Statistics ===\n");

        println!("Overview");
        println!("   Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   Lines read: {}", self.lines_read);
        println!("   Enqueued: {}", self.enqueued);
        println!("   Rejected: {}", self.rejected);
        println!("   Throughput: {:.2} events/s", self.throughput());

        println!("\nEngine");
        println!("   Batches: {}", self.engine.batches);
        println!("   Retries: {}", self.engine.retries);
        println!("   Topology changes: {}", self.engine.topology_changes);
        println!("   Capacity rejections: {}", self.engine.rejected);

        println!("\n{}", self.delivery);
    }
}
