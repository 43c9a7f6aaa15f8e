//! Dispatch metrics
//!
//! `record_*` helpers feed the global `metrics` recorder (Prometheus when
//! installed, a no-op otherwise). [`DeliveryAggregator`] keeps an in-memory
//! summary for end-of-run reports.

use std::collections::BTreeMap;

use metrics::{counter, gauge, histogram};

/// Record a message accepted by the admission gate
pub fn record_message_enqueued() {
    counter!("analytics_messages_enqueued_total").increment(1);
}

/// Record a sub-batch handed to the upload executor
pub fn record_batch_dispatched(messages: usize) {
    counter!("analytics_batches_dispatched_total").increment(1);
    histogram!("analytics_batch_size").record(messages as f64);
}

/// Record messages acknowledged by the backend
pub fn record_messages_delivered(count: usize) {
    counter!("analytics_messages_delivered_total").increment(count as u64);
}

/// Record messages that reached a permanent failure
pub fn record_messages_failed(count: usize, reason: &'static str) {
    counter!("analytics_messages_failed_total", "reason" => reason).increment(count as u64);
}

/// Record a sub-batch refused because every upload slot was taken
pub fn record_capacity_rejection() {
    counter!("analytics_capacity_rejections_total").increment(1);
}

/// Record a retry of a failed upload
pub fn record_upload_retry() {
    counter!("analytics_upload_retries_total").increment(1);
}

/// Record one upload round trip
pub fn record_upload_latency_ms(latency_ms: f64, status: u16) {
    histogram!(
        "analytics_upload_latency_ms",
        "status" => status.to_string()
    )
    .record(latency_ms);
}

/// Record a topology-changed answer from the backend
pub fn record_topology_change() {
    counter!("analytics_topology_changes_total").increment(1);
}

/// Record the outcome of a node count refresh
pub fn record_topology_refresh(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("analytics_topology_refreshes_total", "status" => status).increment(1);
}

/// Record the current upload slot usage
pub fn record_uploads_in_flight(in_flight: usize) {
    gauge!("analytics_uploads_in_flight").set(in_flight as f64);
}

/// Delivery outcome aggregator
///
/// Fed from observer callbacks; produces a summary for reports.
#[derive(Debug, Clone, Default)]
pub struct DeliveryAggregator {
    pub delivered: u64,
    pub failed: u64,
    /// Failure count per reason
    pub failures: BTreeMap<String, u64>,
    /// Admission to acknowledgement latency
    pub latency_ms: RunningStats,
}

impl DeliveryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, latency_ms: Option<f64>) {
        self.delivered += 1;
        if let Some(latency) = latency_ms {
            self.latency_ms.push(latency);
        }
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.failed += 1;
        *self.failures.entry(reason.into()).or_insert(0) += 1;
    }

    pub fn summary(&self) -> DeliverySummary {
        let total = self.delivered + self.failed;
        DeliverySummary {
            delivered: self.delivered,
            failed: self.failed,
            success_rate: if total > 0 {
                self.delivered as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            latency_ms: StatsSummary::from(&self.latency_ms),
            failures: self.failures.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Delivery summary
#[derive(Debug, Clone, Default)]
pub struct DeliverySummary {
    pub delivered: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub latency_ms: StatsSummary,
    pub failures: BTreeMap<String, u64>,
}

impl std::fmt::Display for DeliverySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Delivery Summary ===")?;
        writeln!(
            f,
            "Delivered: {} ({:.2}%)",
            self.delivered, self.success_rate
        )?;
        writeln!(f, "Failed: {}", self.failed)?;
        writeln!(f, "Latency (ms): {}", self.latency_ms)?;

        if !self.failures.is_empty() {
            writeln!(f, "Failures by reason:")?;
            for (reason, count) in &self.failures {
                writeln!(f, "  {}: {}", reason, count)?;
            }
        }

        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();

        stats.push(1.0);
        stats.push(2.0);
        stats.push(3.0);
        stats.push(4.0);
        stats.push(5.0);

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = DeliveryAggregator::new();
        aggregator.record_success(Some(12.0));
        aggregator.record_success(None);
        aggregator.record_failure("capacity");
        aggregator.record_failure("capacity");

        let summary = aggregator.summary();
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.failed, 2);
        assert!((summary.success_rate - 50.0).abs() < 1e-10);
        assert_eq!(summary.latency_ms.count, 1);
        assert_eq!(summary.failures.get("capacity"), Some(&2));
    }

    #[test]
    fn test_summary_display() {
        let summary = DeliverySummary {
            delivered: 95,
            failed: 5,
            success_rate: 95.0,
            latency_ms: StatsSummary::default(),
            failures: BTreeMap::from([("response".to_string(), 5)]),
        };

        let output = format!("{}", summary);
        assert!(output.contains("Delivered: 95 (95.00%)"));
        assert!(output.contains("response: 5"));
        assert!(output.contains("Latency (ms): N/A"));
    }

    #[test]
    fn test_record_helpers_without_recorder() {
        // no recorder installed: every helper is a no-op
        record_message_enqueued();
        record_batch_dispatched(3);
        record_messages_failed(1, "capacity");
        record_topology_refresh(false);
        record_upload_latency_ms(1.5, 200);
    }
}
