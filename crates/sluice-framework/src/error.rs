//! Error types for the Sluice framework.

use sluice_core::StatusError;
use thiserror::Error;

/// Errors that can occur during context extraction.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// No dependency of the requested type is registered.
    #[error("no dependency registered for '{type_name}'")]
    MissingDependency {
        /// The requested type name.
        type_name: &'static str,
    },

    /// The call has no session of the requested type.
    #[error("no session of type '{type_name}'")]
    MissingSession {
        /// The requested session type name.
        type_name: &'static str,
    },

    /// The context was not created by a service host.
    #[error("context is not bound to a service host")]
    NoHost,

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

impl StatusError for ExtractError {
    fn status_code(&self) -> u16 {
        match self {
            Self::MissingSession { .. } => 401,
            _ => 500,
        }
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Raised when gateway calls nest deeper than the host allows.
#[derive(Debug, Clone, Error)]
#[error("gateway call depth {depth} exceeds the limit of {limit}")]
pub struct GatewayDepthExceeded {
    pub depth: u32,
    pub limit: u32,
}

impl StatusError for GatewayDepthExceeded {}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::ServiceError;

    #[test]
    fn extract_errors_map_to_faults() {
        let fault = ServiceError::from(ExtractError::MissingSession { type_name: "User" });
        assert_eq!(fault.status_code(), 401);
        assert_eq!(fault.error_code(), "ExtractError");

        let fault = ServiceError::from(GatewayDepthExceeded { depth: 9, limit: 8 });
        assert_eq!(fault.status_code(), 500);
        assert_eq!(fault.error_code(), "GatewayDepthExceeded");
    }
}
