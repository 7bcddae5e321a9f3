//! Defender - In-Process Client Rate Limiting and Banning
//!
//! This crate tracks request activity per client key and decides, for each
//! event, whether the client is admitted or banned. Each client gets a token
//! bucket; a client that empties its bucket is banned for a fixed duration.
//! Idle and expired clients are evicted by an explicit or background
//! cleanup pass.

pub mod config;
pub mod error;
pub mod tracker;

pub use config::DefenderConfig;
pub use error::{DefenderError, Result};
pub use tracker::{ClientSnapshot, Defender, DefenderBuilder};
