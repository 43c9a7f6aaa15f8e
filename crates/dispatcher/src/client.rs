//! Client - admission gate and lifecycle handle
//!
//! Cheap to clone. Every clone feeds the same coordinator; the engine drains
//! and stops on [`Client::close`] or once the last clone is dropped.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{EngineConfig, Message, Stamp};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::batch::MessageQueue;
use crate::codec::{BatchEncoder, JsonEnvelope};
use crate::coordinator::{Coordinator, EngineState};
use crate::error::DispatcherError;
use crate::executor::UploadExecutor;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::notify::{Notifier, Observer};
use crate::sender::{RetryAfter, Sender};
use crate::topology::{Topology, TopologyResolver};
use crate::transport::{HttpTransport, Transport};

/// Wall clock used to stamp admitted messages and upload attempts
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Message id generator
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Builder for creating a [`Client`]
pub struct ClientBuilder {
    write_key: String,
    config: EngineConfig,
    observer: Option<Arc<dyn Observer>>,
    encoder: Arc<dyn BatchEncoder>,
    now: Clock,
    uid: IdGenerator,
    retry_after: Option<RetryAfter>,
    refresh_delay: Option<Duration>,
}

impl ClientBuilder {
    pub fn new(write_key: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            write_key: write_key.into(),
            config,
            observer: None,
            encoder: Arc::new(JsonEnvelope),
            now: Arc::new(Utc::now),
            uid: Arc::new(|| uuid::Uuid::new_v4().to_string()),
            retry_after: None,
            refresh_delay: None,
        }
    }

    /// Receive per-message delivery outcomes
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the `{"batch":[...]}` body encoder
    pub fn encoder(mut self, encoder: Arc<dyn BatchEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn now(mut self, now: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.now = Arc::new(now);
        self
    }

    pub fn uid(mut self, uid: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.uid = Arc::new(uid);
        self
    }

    /// Delay before retrying after failed attempt `n` (0-based)
    ///
    /// Defaults to the exponential backoff of `EngineConfig::retry`.
    pub fn retry_after(
        mut self,
        retry_after: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.retry_after = Some(Arc::new(retry_after));
        self
    }

    /// Pause between topology refresh attempts
    pub fn refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    /// Build with the reqwest transport
    ///
    /// # Errors
    /// Invalid configuration, or no Tokio runtime to spawn onto
    pub fn build(self) -> Result<Client<HttpTransport>, DispatcherError> {
        self.validate()?;
        let transport = HttpTransport::new(
            &self.config.endpoint,
            self.write_key.clone(),
            self.config.request_timeout(),
        )
        .map_err(|e| DispatcherError::config(format!("cannot create HTTP client: {e}")))?;
        self.build_with_transport(transport)
    }

    /// Build on top of a custom transport
    ///
    /// # Errors
    /// Invalid configuration, or no Tokio runtime to spawn onto
    pub fn build_with_transport<T>(self, transport: T) -> Result<Client<T>, DispatcherError>
    where
        T: Transport + Send + Sync + 'static,
    {
        self.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| {
            DispatcherError::config("client must be built inside a Tokio runtime")
        })?;

        let config = self.config;
        let transport = Arc::new(transport);
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(DispatchMetrics::new());
        let state = Arc::new(AtomicU8::new(EngineState::Running.as_u8()));

        let topology = if config.no_proxy_support {
            Topology::fixed(NonZeroUsize::MIN)
        } else {
            Topology::unknown()
        };
        let mut resolver =
            TopologyResolver::new(Arc::clone(&transport), Arc::new(topology), shutdown.clone());
        if let Some(delay) = self.refresh_delay {
            resolver = resolver.with_retry_delay(delay);
        }
        let resolver = Arc::new(resolver);
        if !config.no_proxy_support {
            resolver.refresh_in_background();
        }

        let retry_after = self.retry_after.unwrap_or_else(|| {
            let retry = config.retry.clone();
            let backoff: RetryAfter = Arc::new(move |attempt: u32| retry.delay(attempt));
            backoff
        });
        let sender = Arc::new(Sender::new(
            transport,
            resolver,
            self.encoder,
            Notifier::new(self.observer, Arc::clone(&metrics)),
            retry_after,
            config.clone(),
            shutdown.clone(),
        )
        .with_clock(Arc::clone(&self.now)));

        let (tx, rx) = async_channel::bounded(config.channel_capacity);
        let coordinator = Coordinator::new(
            rx,
            MessageQueue::new(config.batch_size, config.batch_payload_bytes()),
            UploadExecutor::new(config.max_concurrent_requests),
            Arc::clone(&sender),
            shutdown.clone(),
            Arc::clone(&state),
            config.flush_interval(),
            config.max_message_bytes,
        );
        let handle = tokio::spawn(coordinator.run());

        info!(
            endpoint = %config.endpoint,
            batch_size = config.batch_size,
            max_concurrent_requests = config.max_concurrent_requests,
            "Analytics client started"
        );

        Ok(Client {
            inner: Arc::new(Inner {
                tx,
                closed: AtomicBool::new(false),
                shutdown,
                state,
                coordinator: Mutex::new(Some(handle)),
                metrics,
                sender,
                now: self.now,
                uid: self.uid,
            }),
        })
    }

    fn validate(&self) -> Result<(), DispatcherError> {
        if self.write_key.trim().is_empty() {
            return Err(DispatcherError::config("write key cannot be empty"));
        }
        self.config
            .validate()
            .map_err(|e| DispatcherError::config(e.to_string()))
    }
}

struct Inner<T> {
    tx: async_channel::Sender<Message>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    state: Arc<AtomicU8>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<DispatchMetrics>,
    sender: Arc<Sender<T>>,
    now: Clock,
    uid: IdGenerator,
}

/// Handle to a running dispatch engine
pub struct Client<T = HttpTransport> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Client<HttpTransport> {
    pub fn builder(write_key: impl Into<String>, config: EngineConfig) -> ClientBuilder {
        ClientBuilder::new(write_key, config)
    }
}

impl<T> Client<T>
where
    T: Transport + Send + Sync + 'static,
{
    /// Validate, stamp and queue a message
    ///
    /// Waits while the admission channel is full. Delivery outcomes are
    /// reported to the observer.
    ///
    /// # Errors
    /// - `Validation` for a malformed message (never queued)
    /// - `Closed` once shutdown has begun
    pub async fn enqueue(&self, message: impl Into<Message>) -> Result<(), DispatcherError> {
        let message = self.admit(message.into())?;
        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(DispatcherError::Closed),
            sent = self.inner.tx.send(message) => {
                sent.map_err(|_| DispatcherError::Closed)?;
                self.inner.metrics.inc_enqueued();
                Ok(())
            }
        }
    }

    /// [`Client::enqueue`] for synchronous producers
    ///
    /// Blocks the calling thread while the channel is full; do not call from
    /// an async task.
    pub fn enqueue_blocking(&self, message: impl Into<Message>) -> Result<(), DispatcherError> {
        let message = self.admit(message.into())?;
        self.inner
            .tx
            .send_blocking(message)
            .map_err(|_| DispatcherError::Closed)?;
        self.inner.metrics.inc_enqueued();
        Ok(())
    }

    fn admit(&self, mut message: Message) -> Result<Message, DispatcherError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DispatcherError::Closed);
        }
        message.validate()?;
        let stamp = Stamp::new((self.inner.now)(), &*self.inner.uid);
        message.apply_defaults(&stamp);
        Ok(message)
    }

    /// Stop intake, drain, flush and wait for every upload
    ///
    /// # Errors
    /// `Closed` on every call after the first
    #[instrument(name = "client_close", skip(self))]
    pub async fn close(&self) -> Result<(), DispatcherError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(DispatcherError::Closed);
        }
        self.inner.shutdown.cancel();

        let handle = self.inner.coordinator.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Coordinator task failed");
            }
        }
        info!(metrics = ?self.metrics(), "Analytics client closed");
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Current node count, `None` until the first refresh succeeds
    pub fn node_count(&self) -> Option<NonZeroUsize> {
        self.inner.sender.topology().snapshot()
    }

    /// Topology refreshes started so far
    pub fn refresh_count(&self) -> u64 {
        self.inner.sender.resolver().refresh_count()
    }
}
