//! Core client tracker implementation.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::client::{Client, ClientSnapshot};
use super::clock::{Clock, SystemClock};
use super::hook::{BanHook, FnHook};
use crate::error::{BoxError, DefenderError, Result};

/// Default multiplier applied to the rate window to get the eviction period.
pub const EVICTION_FACTOR: u32 = 10;

/// Tracks clients by key and decides whether each event is admitted.
///
/// Every client gets a token bucket holding `max` tokens that refills one
/// token per `duration`. A client that runs out of tokens is banned for
/// `ban_duration`; while banned every check reports it as banned without
/// touching its bucket. Bans are lifted lazily by the next check after they
/// run out.
///
/// All state sits behind a single mutex, so checks, lookups and cleanup
/// passes are serialized. This struct is thread-safe and can be shared
/// across threads and tasks behind an `Arc`.
pub struct Defender<K> {
    /// Client state indexed by key
    clients: Mutex<HashMap<K, Client>>,
    /// Bucket capacity (events allowed per window)
    max: u32,
    /// Refill interval
    duration: Duration,
    /// How long a ban lasts
    ban_duration: Duration,
    /// Multiplier for the eviction period
    eviction_factor: u32,
    /// `duration * eviction_factor`
    eviction_period: Duration,
    /// Notified on every ban transition
    hook: Option<Box<dyn BanHook<K>>>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl<K> Defender<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create a tracker allowing `max` events per `duration`, banning
    /// offenders for `ban_duration`.
    pub fn new(max: u32, duration: Duration, ban_duration: Duration) -> Result<Self> {
        Self::builder(max, duration, ban_duration).build()
    }

    /// Start building a tracker with a hook, clock or eviction factor.
    pub fn builder(max: u32, duration: Duration, ban_duration: Duration) -> DefenderBuilder<K> {
        DefenderBuilder::new(max, duration, ban_duration)
    }

    /// Record one event for `key` and report whether the client is banned.
    ///
    /// Returns `Ok(false)` if the event is admitted and `Ok(true)` if the
    /// client is banned, either already or by this very event. If this event
    /// triggered the ban and the ban hook fails, the hook's error is returned
    /// instead; the client is banned all the same.
    pub fn check(&self, key: &K) -> Result<bool> {
        let mut clients = self.clients.lock();
        let now = self.clock.now();

        trace!(key = ?key, "Checking client");

        let client = clients.entry(key.clone()).or_insert_with(|| {
            debug!(
                key = ?key,
                max = self.max,
                duration = ?self.duration,
                "Tracking new client"
            );
            Client::new(self.max, self.duration, deadline(now, self.eviction_period, now), now)
        });

        if client.banned && client.is_expired(now) {
            debug!(key = ?key, "Ban expired, client unbanned");
            client.banned = false;
            client.bucket.reset(now);
        }

        if client.banned {
            return Ok(true);
        }

        client.expire = deadline(now, self.eviction_period, client.expire);

        if client.bucket.try_acquire(now) {
            return Ok(false);
        }

        client.banned = true;
        client.expire = deadline(now, self.ban_duration, client.expire);
        let until = client.expire;

        info!(
            key = ?key,
            ban_duration = ?self.ban_duration,
            "Client exceeded its allowance and is banned"
        );

        if let Some(hook) = &self.hook {
            if let Err(source) = hook.on_ban(key, until) {
                warn!(key = ?key, error = %source, "Ban hook failed");
                return Err(DefenderError::Hook {
                    key: format!("{:?}", key),
                    source,
                });
            }
        }

        Ok(true)
    }

    /// Snapshots of every client currently flagged as banned.
    ///
    /// No lazy unbanning happens here: a client whose ban has run out but
    /// that has not been checked or cleaned up since is still listed.
    pub fn ban_list(&self) -> Vec<ClientSnapshot<K>> {
        let clients = self.clients.lock();
        let now = self.clock.now();

        clients
            .iter()
            .filter(|(_, client)| client.banned)
            .map(|(key, client)| client.snapshot(key, now))
            .collect()
    }

    /// Get a snapshot of the state for `key`, if tracked.
    ///
    /// This neither creates the client nor consumes a token.
    pub fn client(&self, key: &K) -> Option<ClientSnapshot<K>> {
        let clients = self.clients.lock();
        let now = self.clock.now();
        clients.get(key).map(|client| client.snapshot(key, now))
    }

    /// Remove every client whose expiry has passed, banned or not.
    ///
    /// Returns the number of clients evicted.
    pub fn cleanup(&self) -> usize {
        let mut clients = self.clients.lock();
        let now = self.clock.now();

        let before = clients.len();
        clients.retain(|_, client| !client.is_expired(now));
        let evicted = before - clients.len();

        debug!(evicted, remaining = clients.len(), "Cleanup pass finished");
        evicted
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Returns `true` if no client is tracked.
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

impl<K> Defender<K> {
    /// Events allowed per window.
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Refill interval of each client's bucket.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// How long a ban lasts.
    pub fn ban_duration(&self) -> Duration {
        self.ban_duration
    }

    /// Multiplier applied to `duration` to get the eviction period.
    pub fn eviction_factor(&self) -> u32 {
        self.eviction_factor
    }

    /// How long an idle client is retained, and the background cleanup period.
    pub fn eviction_period(&self) -> Duration {
        self.eviction_period
    }
}

/// `now + span`, or `fallback` if that is not representable as an `Instant`.
fn deadline(now: Instant, span: Duration, fallback: Instant) -> Instant {
    now.checked_add(span).unwrap_or(fallback)
}

impl<K> fmt::Debug for Defender<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Defender")
            .field("clients", &self.clients.lock().len())
            .field("max", &self.max)
            .field("duration", &self.duration)
            .field("ban_duration", &self.ban_duration)
            .field("eviction_factor", &self.eviction_factor)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Builder for [`Defender`].
pub struct DefenderBuilder<K> {
    max: u32,
    duration: Duration,
    ban_duration: Duration,
    eviction_factor: u32,
    hook: Option<Box<dyn BanHook<K>>>,
    clock: Arc<dyn Clock>,
}

impl<K> DefenderBuilder<K> {
    /// Create a builder with the default eviction factor and system clock.
    pub fn new(max: u32, duration: Duration, ban_duration: Duration) -> Self {
        Self {
            max,
            duration,
            ban_duration,
            eviction_factor: EVICTION_FACTOR,
            hook: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Notify `hook` whenever a client gets banned.
    pub fn hook<H>(mut self, hook: H) -> Self
    where
        H: BanHook<K> + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Notify a closure whenever a client gets banned.
    pub fn hook_fn<F>(self, f: F) -> Self
    where
        F: Fn(&K) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hook(FnHook(f))
    }

    /// Read time from `clock` instead of the system clock.
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Override the eviction factor.
    pub fn eviction_factor(mut self, factor: u32) -> Self {
        self.eviction_factor = factor;
        self
    }

    /// Validate the parameters and build the tracker.
    pub fn build(self) -> Result<Defender<K>> {
        if self.duration.is_zero() {
            return Err(DefenderError::Config("duration must be positive".to_string()));
        }
        if self.ban_duration.is_zero() {
            return Err(DefenderError::Config("ban duration must be positive".to_string()));
        }
        if self.eviction_factor == 0 {
            return Err(DefenderError::Config("eviction factor must be positive".to_string()));
        }

        let eviction_period = self
            .duration
            .checked_mul(self.eviction_factor)
            .ok_or_else(|| DefenderError::Config("eviction period overflows".to_string()))?;

        let now = self.clock.now();
        if now.checked_add(self.ban_duration).is_none() {
            return Err(DefenderError::Config("ban duration is too large".to_string()));
        }
        if now.checked_add(eviction_period).is_none() {
            return Err(DefenderError::Config("eviction period is too large".to_string()));
        }

        Ok(Defender {
            clients: Mutex::new(HashMap::new()),
            max: self.max,
            duration: self.duration,
            ban_duration: self.ban_duration,
            eviction_factor: self.eviction_factor,
            eviction_period,
            hook: self.hook,
            clock: self.clock,
        })
    }
}
