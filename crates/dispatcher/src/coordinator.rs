//! Coordinator loop
//!
//! The single task that owns the accumulator. Consumes admitted messages and
//! flush ticks, dispatches completed batches and runs the drain sequence.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::Message;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::batch::MessageQueue;
use crate::codec::QueuedMessage;
use crate::error::DispatcherError;
use crate::executor::UploadExecutor;
use crate::sender::{PendingRequest, Sender};
use crate::shard;
use crate::transport::Transport;

/// Lifecycle of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Draining,
    /// Terminal
    Stopped,
}

impl EngineState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Draining => 1,
            Self::Stopped => 2,
        }
    }
}

pub(crate) struct Coordinator<T> {
    rx: async_channel::Receiver<Message>,
    queue: MessageQueue,
    executor: UploadExecutor,
    sender: Arc<Sender<T>>,
    shutdown: CancellationToken,
    state: Arc<AtomicU8>,
    flush_interval: Duration,
    max_message_bytes: usize,
}

impl<T> Coordinator<T>
where
    T: Transport + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        rx: async_channel::Receiver<Message>,
        queue: MessageQueue,
        executor: UploadExecutor,
        sender: Arc<Sender<T>>,
        shutdown: CancellationToken,
        state: Arc<AtomicU8>,
        flush_interval: Duration,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            rx,
            queue,
            executor,
            sender,
            shutdown,
            state,
            flush_interval,
            max_message_bytes,
        }
    }

    /// Run until shutdown or until every client handle is gone
    #[instrument(name = "coordinator_run", skip(self))]
    pub(crate) async fn run(mut self) {
        self.set_state(EngineState::Running);
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.flush_interval,
            self.flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Coordinator started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                received = self.rx.recv() => match received {
                    Ok(message) => self.admit(message),
                    // every sender dropped
                    Err(_) => break,
                },
                _ = ticker.tick() => self.flush(),
            }
        }

        self.drain().await;
    }

    fn admit(&mut self, message: Message) {
        match QueuedMessage::encode(message, self.max_message_bytes) {
            Ok(queued) => {
                if let Some(batch) = self.queue.push(queued) {
                    self.dispatch(batch);
                }
            }
            Err((message, e)) => self.sender.notifier().failure_one(&message, &e),
        }
    }

    fn flush(&mut self) {
        if let Some(batch) = self.queue.flush() {
            debug!(messages = batch.len(), "Flushing partial batch");
            self.dispatch(batch);
        }
    }

    /// Route a completed batch and hand each sub-batch to the executor
    fn dispatch(&mut self, batch: Vec<QueuedMessage>) {
        let requests: Vec<PendingRequest> = match self.sender.topology().snapshot() {
            Some(node_count) => shard::route(batch, node_count)
                .into_iter()
                .map(|(shard, messages)| PendingRequest::for_shard(shard, messages))
                .collect(),
            // routed by the upload task once the count is known
            None => vec![PendingRequest::unassigned(batch)],
        };

        for request in requests {
            let metrics = self.sender.notifier().metrics();
            let Some(slot) = self.executor.try_reserve() else {
                metrics.inc_rejected();
                self.sender
                    .notifier()
                    .failure(&request.messages, &DispatcherError::Capacity);
                continue;
            };
            metrics.inc_batches(request.messages.len());
            let sender = Arc::clone(&self.sender);
            self.executor
                .spawn(slot, async move { sender.send(request).await });
        }
    }

    #[instrument(name = "coordinator_drain", skip(self))]
    async fn drain(&mut self) {
        self.set_state(EngineState::Draining);
        self.rx.close();

        let mut drained = 0usize;
        while let Ok(message) = self.rx.try_recv() {
            self.admit(message);
            drained += 1;
        }
        self.flush();
        debug!(drained, in_flight = self.executor.in_flight(), "Waiting for uploads");

        self.executor.join_all().await;
        self.set_state(EngineState::Stopped);
        info!("Coordinator stopped");
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}
