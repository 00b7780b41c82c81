//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;
use sluice_core::TransportError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A transport failed to start.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The configuration needs a transport this build does not include.
    #[error("Transport unavailable: {0} (enable the matching cargo feature)")]
    TransportUnavailable(&'static str),

    /// A shutdown signal handler could not be installed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
