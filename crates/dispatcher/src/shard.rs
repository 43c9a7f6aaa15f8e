//! Shard router
//!
//! Pure mapping from message identity to backend shard. Re-running it after a
//! topology change regenerates the assignment without touching the messages.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use crate::codec::QueuedMessage;

/// Shard index of an identity for a given node count
pub fn shard_for(user_id: &str, anonymous_id: &str, node_count: NonZeroUsize) -> usize {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(anonymous_id.as_bytes());
    hasher.finalize() as usize % node_count.get()
}

/// Partition messages by shard, keeping relative order within each shard
pub fn route(
    messages: Vec<QueuedMessage>,
    node_count: NonZeroUsize,
) -> BTreeMap<usize, Vec<QueuedMessage>> {
    let mut shards: BTreeMap<usize, Vec<QueuedMessage>> = BTreeMap::new();
    for message in messages {
        let shard = shard_for(message.user_id(), message.anonymous_id(), node_count);
        shards.entry(shard).or_default().push(message);
    }
    shards
}
