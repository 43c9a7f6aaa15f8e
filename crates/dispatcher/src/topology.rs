//! Topology resolver
//!
//! The backend node count is the only state shared between concurrent upload
//! tasks. It lives in one atomic owned by [`TopologyResolver`]; every other
//! component reads it through [`Topology::snapshot`].

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::DispatcherError;
use crate::transport::Transport;

/// Attempts per refresh
pub const REFRESH_ATTEMPTS: u32 = 10;

/// Pause between refresh attempts
pub const REFRESH_DELAY: Duration = Duration::from_millis(200);

/// Outcome of the most recent refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Never,
    Succeeded,
    Failed,
}

impl RefreshOutcome {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Succeeded,
            2 => Self::Failed,
            _ => Self::Never,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Never => 0,
            Self::Succeeded => 1,
            Self::Failed => 2,
        }
    }
}

/// Current node count (0 = not yet established)
#[derive(Debug)]
pub struct Topology {
    node_count: AtomicUsize,
    last_refresh: AtomicU8,
}

impl Topology {
    /// Node count not yet known
    pub fn unknown() -> Self {
        Self {
            node_count: AtomicUsize::new(0),
            last_refresh: AtomicU8::new(RefreshOutcome::Never.as_u8()),
        }
    }

    /// Node count known up front and never refreshed
    pub fn fixed(node_count: NonZeroUsize) -> Self {
        Self {
            node_count: AtomicUsize::new(node_count.get()),
            last_refresh: AtomicU8::new(RefreshOutcome::Never.as_u8()),
        }
    }

    pub fn snapshot(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.node_count.load(Ordering::Acquire))
    }

    pub fn last_refresh(&self) -> RefreshOutcome {
        RefreshOutcome::from_u8(self.last_refresh.load(Ordering::Acquire))
    }

    fn publish(&self, node_count: NonZeroUsize) {
        self.node_count.store(node_count.get(), Ordering::Release);
        self.last_refresh
            .store(RefreshOutcome::Succeeded.as_u8(), Ordering::Release);
    }

    fn mark_failed(&self) {
        self.last_refresh
            .store(RefreshOutcome::Failed.as_u8(), Ordering::Release);
    }
}

/// Refreshes the node count from the backend, off the coordinator's path
pub struct TopologyResolver<T> {
    transport: Arc<T>,
    topology: Arc<Topology>,
    shutdown: CancellationToken,
    retry_delay: Duration,
    refreshing: AtomicBool,
    refreshes: AtomicU64,
    /// Refreshes that ran to an outcome
    completed: AtomicU64,
    /// Attempts spent by the last failed refresh
    failed_attempts: AtomicU32,
    /// Serializes refreshes started because the count was unknown
    gate: Mutex<()>,
}

impl<T> TopologyResolver<T>
where
    T: Transport + Send + Sync + 'static,
{
    pub fn new(transport: Arc<T>, topology: Arc<Topology>, shutdown: CancellationToken) -> Self {
        Self {
            transport,
            topology,
            shutdown,
            retry_delay: REFRESH_DELAY,
            refreshing: AtomicBool::new(false),
            refreshes: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed_attempts: AtomicU32::new(0),
            gate: Mutex::new(()),
        }
    }

    /// Override the pause between attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Number of refreshes started so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Query the backend until it reports a node count
    ///
    /// # Errors
    /// `TopologyUnknown` once every attempt failed or shutdown interrupted the
    /// wait. The previous node count is left untouched.
    #[instrument(name = "topology_refresh", skip(self))]
    pub async fn refresh(&self) -> Result<NonZeroUsize, DispatcherError> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let mut attempts = 0;

        while attempts < REFRESH_ATTEMPTS {
            if attempts > 0 {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
            attempts += 1;

            match self.transport.cluster_info().await {
                Ok(info) => match NonZeroUsize::new(info.node_count) {
                    Some(node_count) => {
                        self.topology.publish(node_count);
                        self.completed.fetch_add(1, Ordering::AcqRel);
                        observability::metrics::record_topology_refresh(true);
                        debug!(node_count = node_count.get(), attempts, "Topology refreshed");
                        return Ok(node_count);
                    }
                    None => debug!(attempt = attempts, "Backend reported zero nodes"),
                },
                Err(e) => debug!(attempt = attempts, error = %e, "Cluster info request failed"),
            }
        }

        self.topology.mark_failed();
        self.failed_attempts.store(attempts, Ordering::Release);
        self.completed.fetch_add(1, Ordering::AcqRel);
        observability::metrics::record_topology_refresh(false);
        warn!(attempts, "Topology refresh failed, keeping previous node count");
        Err(DispatcherError::TopologyUnknown { attempts })
    }

    /// Known node count, refreshing first if it is not established yet
    ///
    /// Concurrent callers wait for a single refresh instead of each starting
    /// their own. A caller that waited behind a failed refresh gets that
    /// failure back.
    pub async fn resolve(&self) -> Result<NonZeroUsize, DispatcherError> {
        if let Some(node_count) = self.topology.snapshot() {
            return Ok(node_count);
        }
        let seen = self.completed.load(Ordering::Acquire);
        let _gate = self.gate.lock().await;
        if let Some(node_count) = self.topology.snapshot() {
            return Ok(node_count);
        }
        if self.completed.load(Ordering::Acquire) != seen {
            let attempts = self.failed_attempts.load(Ordering::Acquire);
            return Err(DispatcherError::TopologyUnknown { attempts });
        }
        self.refresh().await
    }

    /// Spawn a refresh unless one is already running
    ///
    /// Returns `false` when a refresh was already in flight.
    pub fn refresh_in_background(self: &Arc<Self>) -> bool {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return false;
        }
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            {
                let _gate = resolver.gate.lock().await;
                let _ = resolver.refresh().await;
            }
            resolver.refreshing.store(false, Ordering::Release);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    type Fixture = (
        Arc<TopologyResolver<ScriptedTransport>>,
        Arc<ScriptedTransport>,
    );

    fn resolver(transport: ScriptedTransport) -> Fixture {
        let transport = Arc::new(transport);
        let resolver = TopologyResolver::new(
            Arc::clone(&transport),
            Arc::new(Topology::unknown()),
            CancellationToken::new(),
        )
        .with_retry_delay(Duration::from_millis(1));
        (Arc::new(resolver), transport)
    }

    #[test]
    fn test_unknown_and_fixed_snapshots() {
        assert_eq!(Topology::unknown().snapshot(), None);
        let fixed = Topology::fixed(NonZeroUsize::new(3).unwrap());
        assert_eq!(fixed.snapshot().map(NonZeroUsize::get), Some(3));
        assert_eq!(fixed.last_refresh(), RefreshOutcome::Never);
    }

    #[tokio::test]
    async fn test_refresh_publishes_after_failures() {
        let (resolver, transport) = resolver(
            ScriptedTransport::new().with_node_counts([Err("down".into()), Ok(0), Ok(4)]),
        );
        let node_count = resolver.refresh().await.unwrap();
        assert_eq!(node_count.get(), 4);
        assert_eq!(transport.cluster_calls(), 3);
        assert_eq!(resolver.topology().snapshot(), Some(node_count));
        assert_eq!(resolver.topology().last_refresh(), RefreshOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_previous_value() {
        let (resolver, transport) = resolver(
            ScriptedTransport::new()
                .with_node_counts([Ok(2)])
                .with_fallback_node_count(None),
        );
        resolver.refresh().await.unwrap();

        let err = resolver.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            DispatcherError::TopologyUnknown { attempts: REFRESH_ATTEMPTS }
        ));
        assert_eq!(transport.cluster_calls(), 1 + REFRESH_ATTEMPTS as usize);
        assert_eq!(resolver.topology().snapshot().map(NonZeroUsize::get), Some(2));
        assert_eq!(resolver.topology().last_refresh(), RefreshOutcome::Failed);
        assert_eq!(resolver.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_refresh() {
        let transport = Arc::new(ScriptedTransport::new().with_fallback_node_count(None));
        let shutdown = CancellationToken::new();
        let resolver = TopologyResolver::new(
            Arc::clone(&transport),
            Arc::new(Topology::unknown()),
            shutdown.clone(),
        )
        .with_retry_delay(Duration::from_secs(60));

        shutdown.cancel();
        let err = resolver.refresh().await.unwrap_err();
        assert!(matches!(err, DispatcherError::TopologyUnknown { attempts: 1 }));
        assert_eq!(transport.cluster_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_refreshes_only_when_unknown() {
        let (resolver, transport) = resolver(ScriptedTransport::new().with_node_counts([Ok(3)]));
        assert_eq!(resolver.resolve().await.unwrap().get(), 3);
        assert_eq!(resolver.resolve().await.unwrap().get(), 3);
        assert_eq!(transport.cluster_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_waits_for_background_refresh() {
        let (resolver, transport) = resolver(
            ScriptedTransport::new().with_node_counts([Err("a".into()), Err("b".into()), Ok(5)]),
        );
        assert!(resolver.refresh_in_background());
        tokio::task::yield_now().await;

        assert_eq!(resolver.resolve().await.unwrap().get(), 5);
        assert_eq!(transport.cluster_calls(), 3);
        assert_eq!(resolver.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolve_shares_failed_refresh() {
        let (resolver, transport) =
            resolver(ScriptedTransport::new().with_fallback_node_count(None));

        let (a, b, c) = tokio::join!(resolver.resolve(), resolver.resolve(), resolver.resolve());
        for result in [a, b, c] {
            assert!(matches!(
                result,
                Err(DispatcherError::TopologyUnknown { attempts: REFRESH_ATTEMPTS })
            ));
        }
        assert_eq!(resolver.refresh_count(), 1);
        assert_eq!(transport.cluster_calls(), REFRESH_ATTEMPTS as usize);

        // a later caller starts a fresh refresh
        let _ = resolver.resolve().await;
        assert_eq!(resolver.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_background_refresh_is_deduplicated() {
        let (resolver, _transport) =
            resolver(ScriptedTransport::new().with_fallback_node_count(None));
        assert!(resolver.refresh_in_background());
        assert!(!resolver.refresh_in_background());

        // ten attempts, 1 ms apart
        for _ in 0..200 {
            if resolver.topology().last_refresh() == RefreshOutcome::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(resolver.topology().last_refresh(), RefreshOutcome::Failed);
        // the flag is released right after the outcome is recorded
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(resolver.refresh_in_background());
    }
}
