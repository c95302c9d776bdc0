//! Per-tenant cache: a fixed fan-out of [`Shard`]s.
//!
//! Sharding buys two things. Each lock covers a 256th of the tenant's keys,
//! and a prune pauses any one caller for a single shard at a time. Keys are
//! also a byte shorter once the selector is implied by the shard.

use std::time::SystemTime;

use crate::{key::Key, shard::Shard, stamp::Ref};

/// Number of shards per tenant, one per value of the selector byte.
pub const SHARDS: usize = 256;

/// The recency cache of a single tenant.
#[derive(Debug)]
pub struct Cache {
    shards: [Shard; SHARDS],
}

impl Cache {
    /// Create a cache with every shard referenced to `reference`.
    #[must_use]
    pub fn new(reference: Ref) -> Self {
        Self {
            shards: std::array::from_fn(|_| Shard::new(reference)),
        }
    }

    /// Mark `key` as seen at `now`, returning whether it was already present.
    pub fn touch(&self, key: &Key, now: SystemTime) -> bool {
        self.shards[usize::from(key.shard())].touch(key.sub_key(), now)
    }

    /// Total entries across all shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    /// Whether every shard is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(Shard::is_empty)
    }

    /// Prune every shard in turn, returning the total retained.
    pub fn prune(&self, now: SystemTime, stale_threshold: u8) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.prune(now, stale_threshold))
            .sum()
    }
}
