//! Transport/retry engine
//!
//! Drives one dispatched batch to a terminal outcome. Work is an explicit
//! list of [`PendingRequest`]s: a request leaves the list only once it was
//! acknowledged or reported as failed, so a topology change re-routes exactly
//! the messages that are still unacknowledged.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use contracts::EngineConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::client::Clock;
use crate::codec::{self, BatchEncoder, QueuedMessage};
use crate::error::DispatcherError;
use crate::notify::Notifier;
use crate::shard;
use crate::topology::{Topology, TopologyResolver};
use crate::transport::{
    ShardTarget, Transport, TransportError, UploadRequest, TOPOLOGY_CHANGED_STATUS,
};

/// Attempts per request
pub const MAX_ATTEMPTS: u32 = 10;

/// Topology-change rounds per dispatched batch
pub const MAX_TOPOLOGY_ROUNDS: u32 = 10;

/// Delay before retrying after failed attempt `n` (0-based)
pub type RetryAfter = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// A sub-batch waiting for upload
#[derive(Debug)]
pub struct PendingRequest {
    /// `None` until routed against a known node count
    pub shard: Option<usize>,
    pub messages: Vec<QueuedMessage>,
    pub attempt: u32,
}

impl PendingRequest {
    pub fn unassigned(messages: Vec<QueuedMessage>) -> Self {
        Self {
            shard: None,
            messages,
            attempt: 0,
        }
    }

    pub fn for_shard(shard: usize, messages: Vec<QueuedMessage>) -> Self {
        Self {
            shard: Some(shard),
            messages,
            attempt: 0,
        }
    }
}

enum Outcome {
    Delivered,
    TopologyChanged,
    Retry(DispatcherError),
    Fatal(DispatcherError),
}

impl Outcome {
    fn failed(error: DispatcherError) -> Self {
        if error.is_retryable() {
            Self::Retry(error)
        } else {
            Self::Fatal(error)
        }
    }
}

/// Shared by every upload task
pub struct Sender<T> {
    transport: Arc<T>,
    resolver: Arc<TopologyResolver<T>>,
    encoder: Arc<dyn BatchEncoder>,
    notifier: Notifier,
    retry_after: RetryAfter,
    config: EngineConfig,
    shutdown: CancellationToken,
    now: Clock,
}

impl<T> Sender<T>
where
    T: Transport + Send + Sync + 'static,
{
    pub fn new(
        transport: Arc<T>,
        resolver: Arc<TopologyResolver<T>>,
        encoder: Arc<dyn BatchEncoder>,
        notifier: Notifier,
        retry_after: RetryAfter,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            resolver,
            encoder,
            notifier,
            retry_after,
            config,
            shutdown,
            now: Arc::new(Utc::now),
        }
    }

    /// Clock used to stamp `sentAt` on every attempt
    pub fn with_clock(mut self, now: Clock) -> Self {
        self.now = now;
        self
    }

    pub fn topology(&self) -> &Arc<Topology> {
        self.resolver.topology()
    }

    pub fn resolver(&self) -> &Arc<TopologyResolver<T>> {
        &self.resolver
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Deliver `request` and everything it is split into
    #[instrument(
        name = "sender_send",
        skip_all,
        fields(messages = request.messages.len(), shard = ?request.shard)
    )]
    pub async fn send(&self, request: PendingRequest) {
        let mut work = VecDeque::from([request]);
        let mut rounds = 0u32;

        while let Some(mut request) = work.pop_front() {
            loop {
                let node_count = match self.topology().snapshot() {
                    Some(node_count) => node_count,
                    None => match self.resolver.resolve().await {
                        Ok(node_count) => node_count,
                        Err(e) => {
                            // defer to the next round rather than guess
                            if !self.backoff(&mut request).await {
                                self.notifier.failure(&request.messages, &e);
                                break;
                            }
                            continue;
                        }
                    },
                };

                let Some(shard) = request.shard else {
                    let routed = shard::route(std::mem::take(&mut request.messages), node_count);
                    for (shard, messages) in routed.into_iter().rev() {
                        work.push_front(PendingRequest {
                            shard: Some(shard),
                            messages,
                            attempt: request.attempt,
                        });
                    }
                    break;
                };

                match self.attempt(&mut request, shard, node_count).await {
                    Outcome::Delivered => {
                        self.notifier.success(&request.messages);
                        break;
                    }
                    Outcome::Fatal(e) => {
                        self.notifier.failure(&request.messages, &e);
                        break;
                    }
                    Outcome::Retry(e) => {
                        debug!(shard, attempt = request.attempt, error = %e, "Upload failed");
                        if !self.backoff(&mut request).await {
                            self.notifier.failure(&request.messages, &e);
                            break;
                        }
                    }
                    Outcome::TopologyChanged => {
                        rounds += 1;
                        self.notifier.metrics().inc_topology_changes();
                        if let Err(e) = self.resolver.refresh().await {
                            debug!(error = %e, "Refresh after topology change failed");
                        }

                        if rounds >= MAX_TOPOLOGY_ROUNDS {
                            let e = DispatcherError::TopologyChanged { rounds };
                            warn!(rounds, "Topology kept changing, giving up");
                            self.notifier.failure(&request.messages, &e);
                            for pending in work.drain(..) {
                                self.notifier.failure(&pending.messages, &e);
                            }
                            break;
                        }

                        // acknowledged requests already left the list
                        let mut unacknowledged = std::mem::take(&mut request.messages);
                        for pending in work.drain(..) {
                            unacknowledged.extend(pending.messages);
                        }
                        debug!(
                            rounds,
                            messages = unacknowledged.len(),
                            "Topology changed, re-routing"
                        );

                        if !self.pause(self.config.topology_backoff(rounds)).await {
                            let e = DispatcherError::TopologyChanged { rounds };
                            self.notifier.failure(&unacknowledged, &e);
                            break;
                        }
                        work.push_back(PendingRequest {
                            shard: None,
                            messages: unacknowledged,
                            attempt: request.attempt + 1,
                        });
                        break;
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &mut PendingRequest,
        shard: usize,
        node_count: NonZeroUsize,
    ) -> Outcome {
        let sent_at = (self.now)();
        for queued in &mut request.messages {
            if let Err(e) = queued.restamp(sent_at) {
                return Outcome::failed(e);
            }
        }
        let body = match self.encoder.encode(&request.messages) {
            Ok(body) => body,
            Err(e) => return Outcome::failed(e),
        };
        let (body, compressed) = if self.config.disable_gzip {
            (body, false)
        } else {
            match codec::gzip(&body) {
                Ok(compressed) => (compressed, true),
                Err(e) => return Outcome::failed(TransportError::from(e).into()),
            }
        };
        let target = (!self.config.no_proxy_support).then(|| ShardTarget {
            index: shard % node_count.get(),
            node_count: node_count.get(),
        });

        let started = Instant::now();
        let result = self
            .transport
            .upload(UploadRequest {
                body,
                compressed,
                target,
            })
            .await;
        if let Ok(response) = &result {
            observability::metrics::record_upload_latency_ms(
                started.elapsed().as_secs_f64() * 1_000.0,
                response.status,
            );
        }

        match result {
            Ok(response) if response.is_success() => Outcome::Delivered,
            Ok(response)
                if response.status == TOPOLOGY_CHANGED_STATUS && !self.config.no_proxy_support =>
            {
                Outcome::TopologyChanged
            }
            Ok(response) => {
                Outcome::failed(DispatcherError::response(response.status, response.body))
            }
            Err(e) => Outcome::failed(e.into()),
        }
    }

    /// Consume an attempt and sleep before the next one
    ///
    /// Returns `false` when no attempt is left or shutdown interrupted the wait.
    async fn backoff(&self, request: &mut PendingRequest) -> bool {
        let failed = request.attempt;
        request.attempt += 1;
        if request.attempt >= MAX_ATTEMPTS {
            return false;
        }
        self.notifier.metrics().inc_retries();
        self.pause((self.retry_after)(failed)).await
    }

    /// Sleep unless shutdown comes first
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                debug!("Retry abandoned on shutdown");
                false
            }
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
