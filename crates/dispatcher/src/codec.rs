//! Message and batch encoding
//!
//! Messages are serialized at admission. Batches are assembled from the
//! pre-serialized bytes so the accumulator's byte accounting matches the wire.
//! Restamping `sentAt` before an upload re-serializes a message without
//! changing its size.

use std::io::Write;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use contracts::{Message, ENVELOPE_OVERHEAD};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::DispatcherError;

/// An admitted message together with its JSON form
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: Message,
    pub json: Bytes,
}

impl QueuedMessage {
    /// Serialize `message`, enforcing the per-message byte limit
    pub fn encode(message: Message, max_bytes: usize) -> Result<Self, (Message, DispatcherError)> {
        let json = match serde_json::to_vec(&message) {
            Ok(json) => json,
            Err(e) => return Err((message, DispatcherError::serialization(e))),
        };
        if json.len() > max_bytes {
            let size = json.len();
            return Err((message, DispatcherError::MessageTooBig { size, max: max_bytes }));
        }
        Ok(Self {
            message,
            json: Bytes::from(json),
        })
    }

    /// Set `sentAt` and refresh the serialized form
    pub fn restamp(&mut self, sent_at: DateTime<Utc>) -> Result<(), DispatcherError> {
        self.message.set_sent_at(sent_at);
        let json = serde_json::to_vec(&self.message).map_err(DispatcherError::serialization)?;
        self.json = Bytes::from(json);
        Ok(())
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        self.json.len()
    }

    pub fn user_id(&self) -> &str {
        self.message.user_id()
    }

    pub fn anonymous_id(&self) -> &str {
        self.message.anonymous_id()
    }
}

/// Turns a sub-batch into a request body
///
/// Failure is not retried.
pub trait BatchEncoder: Send + Sync {
    fn encode(&self, messages: &[QueuedMessage]) -> Result<Vec<u8>, DispatcherError>;
}

/// `{"batch":[m1,m2,...]}`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEnvelope;

impl BatchEncoder for JsonEnvelope {
    fn encode(&self, messages: &[QueuedMessage]) -> Result<Vec<u8>, DispatcherError> {
        let payload: usize = messages.iter().map(QueuedMessage::size).sum();
        let separators = messages.len().saturating_sub(1);
        let mut body = Vec::with_capacity(ENVELOPE_OVERHEAD + payload + separators);

        body.extend_from_slice(br#"{"batch":["#);
        for (i, queued) in messages.iter().enumerate() {
            if i > 0 {
                body.push(b',');
            }
            body.extend_from_slice(&queued.json);
        }
        body.extend_from_slice(b"]}");
        Ok(body)
    }
}

/// Gzip a request body
pub fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::fast());
    encoder.write_all(body)?;
    encoder.finish()
}
