//! Completion notifier
//!
//! Reports the terminal outcome of every admitted message, once.

use std::sync::Arc;

use contracts::Message;
use tracing::{debug, error};

use crate::codec::QueuedMessage;
use crate::error::DispatcherError;
use crate::metrics::DispatchMetrics;

/// Caller-supplied delivery callbacks
///
/// Invoked from upload tasks. Order is kept within one sub-batch, not across
/// sub-batches uploaded concurrently.
pub trait Observer: Send + Sync {
    fn on_success(&self, message: &Message);

    fn on_failure(&self, message: &Message, error: &DispatcherError);
}

/// Routes outcomes to the observer and the engine counters
#[derive(Clone)]
pub struct Notifier {
    observer: Option<Arc<dyn Observer>>,
    metrics: Arc<DispatchMetrics>,
}

impl Notifier {
    pub fn new(observer: Option<Arc<dyn Observer>>, metrics: Arc<DispatchMetrics>) -> Self {
        Self { observer, metrics }
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub fn success(&self, messages: &[QueuedMessage]) {
        self.metrics.add_delivered(messages.len());
        debug!(count = messages.len(), "Batch delivered");
        if let Some(observer) = &self.observer {
            for queued in messages {
                observer.on_success(&queued.message);
            }
        }
    }

    /// Report a permanent failure for every message
    ///
    /// Without an observer the failure is only logged.
    pub fn failure(&self, messages: &[QueuedMessage], error: &DispatcherError) {
        self.metrics.add_failed(messages.len(), error.reason());
        match &self.observer {
            Some(observer) => {
                for queued in messages {
                    observer.on_failure(&queued.message, error);
                }
            }
            None => error!(count = messages.len(), error = %error, "Dropping messages"),
        }
    }

    /// Report a failure for a message that never made it into a batch
    pub fn failure_one(&self, message: &Message, error: &DispatcherError) {
        self.metrics.add_failed(1, error.reason());
        match &self.observer {
            Some(observer) => observer.on_failure(message, error),
            None => error!(
                message_id = message.message_id(),
                error = %error,
                "Dropping message"
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use contracts::Track;
    use std::sync::Mutex;

    /// Observer recording outcomes by message id
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub successes: Mutex<Vec<String>>,
        pub failures: Mutex<Vec<(String, String)>>,
    }

    impl RecordingObserver {
        pub fn successes(&self) -> Vec<String> {
            self.successes.lock().unwrap().clone()
        }

        pub fn failures(&self) -> Vec<(String, String)> {
            self.failures.lock().unwrap().clone()
        }
    }

    impl Observer for RecordingObserver {
        fn on_success(&self, message: &Message) {
            self.successes
                .lock()
                .unwrap()
                .push(message.message_id().to_string());
        }

        fn on_failure(&self, message: &Message, error: &DispatcherError) {
            self.failures
                .lock()
                .unwrap()
                .push((message.message_id().to_string(), error.to_string()));
        }
    }

    fn queued(id: &str) -> QueuedMessage {
        let message = Message::from(Track {
            message_id: id.into(),
            event: "e".into(),
            user_id: "u".into(),
            ..Default::default()
        });
        QueuedMessage::encode(message, usize::MAX).unwrap()
    }

    #[test]
    fn test_notifies_each_message_in_order() {
        let observer = Arc::new(RecordingObserver::default());
        let metrics = Arc::new(DispatchMetrics::new());
        let notifier = Notifier::new(Some(observer.clone()), Arc::clone(&metrics));

        notifier.success(&[queued("1"), queued("2")]);
        notifier.failure(&[queued("3")], &DispatcherError::Capacity);

        assert_eq!(observer.successes(), ["1", "2"]);
        assert_eq!(observer.failures().len(), 1);
        assert_eq!(observer.failures()[0].0, "3");
        assert_eq!(metrics.delivered(), 2);
        assert_eq!(metrics.failed(), 1);
    }

    #[test]
    fn test_without_observer_only_counts() {
        let metrics = Arc::new(DispatchMetrics::new());
        let notifier = Notifier::new(None, Arc::clone(&metrics));
        notifier.failure(&[queued("1")], &DispatcherError::Capacity);
        notifier.failure_one(&queued("2").message, &DispatcherError::Closed);
        assert_eq!(metrics.failed(), 2);
    }
}
