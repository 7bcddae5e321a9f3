//! Error types for the Defender tracker.

use thiserror::Error;

/// Boxed error returned by ban hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for Defender operations.
#[derive(Error, Debug)]
pub enum DefenderError {
    /// Invalid construction parameters or configuration sources
    #[error("Configuration error: {0}")]
    Config(String),

    /// The ban hook failed. The client is banned regardless.
    #[error("Ban hook failed for client {key}: {source}")]
    Hook {
        /// Debug rendering of the banned key
        key: String,
        #[source]
        source: BoxError,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DefenderError {
    /// Returns `true` if this error came from a ban hook, which implies the
    /// client that triggered it is now banned.
    pub fn is_hook(&self) -> bool {
        matches!(self, DefenderError::Hook { .. })
    }
}

/// Result type alias for Defender operations.
pub type Result<T> = std::result::Result<T, DefenderError>;
