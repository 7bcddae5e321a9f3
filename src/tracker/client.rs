//! Per-client tracking state.

use std::time::{Duration, Instant};

use super::bucket::TokenBucket;

/// Mutable state for one client key. Lives only inside the tracker's map.
#[derive(Debug)]
pub(crate) struct Client {
    /// Admission bucket
    pub(crate) bucket: TokenBucket,
    /// Whether the client is currently banned
    pub(crate) banned: bool,
    /// When not banned: eligible for eviction after this instant.
    /// When banned: the instant the ban lifts.
    pub(crate) expire: Instant,
}

impl Client {
    pub(crate) fn new(max: u32, duration: Duration, expire: Instant, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new(max, duration, now),
            banned: false,
            expire,
        }
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now > self.expire
    }

    pub(crate) fn snapshot<K: Clone>(&self, key: &K, now: Instant) -> ClientSnapshot<K> {
        ClientSnapshot {
            key: key.clone(),
            banned: self.banned,
            expire: self.expire,
            tokens: self.bucket.available(now),
        }
    }
}

/// A read-only copy of a client's state, taken under the tracker lock.
///
/// Bans are lifted lazily on the next check, so a snapshot may report a
/// client as banned even though its ban has already run out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot<K> {
    key: K,
    banned: bool,
    expire: Instant,
    tokens: u32,
}

impl<K> ClientSnapshot<K> {
    /// The client key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Whether the client was flagged banned when the snapshot was taken.
    pub fn banned(&self) -> bool {
        self.banned
    }

    /// Ban expiry if banned, eviction deadline otherwise.
    pub fn expire(&self) -> Instant {
        self.expire
    }

    /// Whole tokens available when the snapshot was taken.
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    /// Time left until `expire`, measured from `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expire.saturating_duration_since(now)
    }

    /// Consume the snapshot, returning the key.
    pub fn into_key(self) -> K {
        self.key
    }
}
