//! Notifications emitted when a client transitions into the banned state.
//!
//! Hooks run synchronously inside the tracker's critical section, on the
//! thread whose check triggered the ban. A slow or blocking hook stalls every
//! other tracker operation until it returns. Use [`ChannelHook`] to hand the
//! event to another task and do the real work outside the lock.

use std::fmt;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::error::BoxError;

/// Receives a callback exactly once per ban transition.
pub trait BanHook<K>: Send + Sync {
    /// Called with the key that was just banned and the instant its ban lifts.
    ///
    /// An error is surfaced to the caller of the check that triggered the
    /// ban. The ban stays in effect and the hook is not retried.
    fn on_ban(&self, key: &K, until: Instant) -> Result<(), BoxError>;
}

/// Adapts a closure taking only the key into a [`BanHook`].
pub struct FnHook<F>(pub F);

impl<K, F> BanHook<K> for FnHook<F>
where
    F: Fn(&K) -> Result<(), BoxError> + Send + Sync,
{
    fn on_ban(&self, key: &K, _until: Instant) -> Result<(), BoxError> {
        (self.0)(key)
    }
}

impl<F> fmt::Debug for FnHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHook").finish_non_exhaustive()
    }
}

/// A ban transition, as delivered by [`ChannelHook`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEvent<K> {
    /// The banned key
    pub key: K,
    /// When the ban lifts
    pub until: Instant,
}

/// Forwards ban events to an unbounded channel.
///
/// Delivery never blocks the tracker. The only failure is a dropped receiver.
#[derive(Debug)]
pub struct ChannelHook<K> {
    tx: mpsc::UnboundedSender<BanEvent<K>>,
}

impl<K> ChannelHook<K> {
    /// Create a hook and the receiving half of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BanEvent<K>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<K> BanHook<K> for ChannelHook<K>
where
    K: Clone + Send,
{
    fn on_ban(&self, key: &K, until: Instant) -> Result<(), BoxError> {
        let event = BanEvent {
            key: key.clone(),
            until,
        };
        self.tx
            .send(event)
            .map_err(|_| "ban event receiver dropped".into())
    }
}
