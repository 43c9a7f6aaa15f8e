//! Scripted in-memory transport for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::transport::{
    ClusterInfo, Transport, TransportError, UploadRequest, UploadResponse,
};

/// Answers uploads from a script, then with a fallback status
pub struct ScriptedTransport {
    uploads: Mutex<Vec<UploadRequest>>,
    responses: Mutex<VecDeque<Result<u16, String>>>,
    fallback_status: u16,
    delay: Duration,
    node_counts: Mutex<VecDeque<Result<usize, String>>>,
    fallback_node_count: Option<usize>,
    cluster_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            fallback_status: 200,
            delay: Duration::ZERO,
            node_counts: Mutex::new(VecDeque::new()),
            fallback_node_count: Some(1),
            cluster_calls: AtomicUsize::new(0),
        }
    }

    /// Status used once the script runs out
    pub fn with_fallback_status(mut self, status: u16) -> Self {
        self.fallback_status = status;
        self
    }

    /// Queue upload outcomes; `Err` simulates a network failure
    pub fn with_responses(self, responses: impl IntoIterator<Item = Result<u16, String>>) -> Self {
        self.responses.lock().unwrap().extend(responses);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Node count reported once the script runs out, `None` fails
    pub fn with_fallback_node_count(mut self, node_count: Option<usize>) -> Self {
        self.fallback_node_count = node_count;
        self
    }

    pub fn with_node_counts(self, counts: impl IntoIterator<Item = Result<usize, String>>) -> Self {
        self.node_counts.lock().unwrap().extend(counts);
        self
    }

    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn cluster_calls(&self) -> usize {
        self.cluster_calls.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.uploads.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        match next.unwrap_or(Ok(self.fallback_status)) {
            Ok(status) => Ok(UploadResponse {
                status,
                body: String::new(),
            }),
            Err(message) => Err(TransportError::connection(message)),
        }
    }

    async fn cluster_info(&self) -> Result<ClusterInfo, TransportError> {
        self.cluster_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.node_counts.lock().unwrap().pop_front();
        let outcome = match next {
            Some(outcome) => outcome,
            None => self
                .fallback_node_count
                .ok_or_else(|| "cluster-info unavailable".to_string()),
        };
        outcome
            .map(|node_count| ClusterInfo { node_count })
            .map_err(TransportError::connection)
    }
}
