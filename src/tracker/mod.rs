//! Per-client rate limiting, bans and eviction.

mod bucket;
mod cleanup;
mod client;
mod clock;
mod defender;
mod hook;

pub use bucket::TokenBucket;
pub use client::ClientSnapshot;
pub use clock::{Clock, ManualClock, SystemClock};
pub use defender::{Defender, DefenderBuilder, EVICTION_FACTOR};
pub use hook::{BanEvent, BanHook, ChannelHook, FnHook};
