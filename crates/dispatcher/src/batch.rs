//! Batch accumulator
//!
//! Buffers admitted messages and hands back a completed batch once the count
//! or byte threshold is reached. Owned by the coordinator task, so no locking.

use crate::codec::QueuedMessage;

/// Size/count-bounded message buffer
#[derive(Debug)]
pub struct MessageQueue {
    pending: Vec<QueuedMessage>,
    bytes: usize,
    max_count: usize,
    max_bytes: usize,
}

impl MessageQueue {
    /// `max_bytes` is the payload budget, envelope overhead already removed
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max_count.min(1024)),
            bytes: 0,
            max_count: max_count.max(1),
            max_bytes,
        }
    }

    /// Append a message, returning a completed batch if a threshold was hit
    ///
    /// A message that would push the byte total past the limit closes the
    /// current batch and starts the next one. Reaching the count limit, or the
    /// byte limit exactly, returns the batch including `message`.
    pub fn push(&mut self, message: QueuedMessage) -> Option<Vec<QueuedMessage>> {
        let overflowed = if !self.pending.is_empty()
            && self.bytes + 1 + message.size() > self.max_bytes
        {
            self.take()
        } else {
            None
        };

        self.bytes += message.size() + usize::from(!self.pending.is_empty());
        self.pending.push(message);

        if self.pending.len() >= self.max_count || self.bytes >= self.max_bytes {
            // after an overflow a lone message that fills the budget waits for
            // the next push or flush
            return overflowed.or_else(|| self.take());
        }
        overflowed
    }

    /// Return whatever is buffered and reset
    pub fn flush(&mut self) -> Option<Vec<QueuedMessage>> {
        self.take()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Byte total of the buffer, separators included
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    fn take(&mut self) -> Option<Vec<QueuedMessage>> {
        if self.pending.is_empty() {
            return None;
        }
        self.bytes = 0;
        Some(std::mem::take(&mut self.pending))
    }
}
