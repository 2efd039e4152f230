//! Crate error type.

use thiserror::Error;

use crate::domain::Fault;
use crate::util::config::ConfigError;

/// Errors surfaced by the engine and the event loop.
#[derive(Debug, Error)]
pub enum Error {
    /// An `"error"` event had no listener anywhere up the domain chain.
    #[error("Unhandled error event: {0}")]
    UnhandledError(Fault),

    /// A failure escaped every handler; the loop stopped.
    #[error("Uncaught error: {0}")]
    Uncaught(Fault),

    /// `EventLoop::run` was called from inside a loop callback.
    #[error("Event loop is already running")]
    LoopReentered,

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// The fault carried by this error, if any.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Error::UnhandledError(fault) | Error::Uncaught(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Result alias for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
