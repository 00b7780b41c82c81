//! Unified error types for the Sluice core.
//!
//! Every failure that reaches a caller is a [`ServiceError`]: a status code
//! plus a serializable [`ResponseStatus`]. The shape is identical whether the
//! handler ran in-process or behind a remote gateway, so callers cannot tell
//! the two apart.
//!
//! Ordinary error types opt in through [`StatusError`]; their error code
//! defaults to the type's name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Response status
// =============================================================================

/// Severity of a field-level error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
}

/// A field-level error, e.g. a failed validation rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    pub error_code: String,
    pub field_name: String,
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}

impl ResponseError {
    /// Creates a field error.
    pub fn new(
        field_name: impl Into<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_code: error_code.into(),
            field_name: field_name.into(),
            message: message.into(),
            ..Default::default()
        }
    }
}

/// The structured body of a fault.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStatus {
    pub error_code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ResponseError>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}

/// The wire envelope of a fault: `{"responseStatus": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub response_status: ResponseStatus,
}

// =============================================================================
// ServiceError
// =============================================================================

/// A structured fault surfaced at the dispatch call boundary.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} ({}): {}", .response_status.error_code, .status_code, .response_status.message)]
pub struct ServiceError {
    status_code: u16,
    response_status: ResponseStatus,
}

impl ServiceError {
    /// Creates a fault with an explicit code and message.
    pub fn new(status_code: u16, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            response_status: ResponseStatus {
                error_code: error_code.into(),
                message: message.into(),
                ..Default::default()
            },
        }
    }

    /// Rebuilds a fault from its wire representation.
    pub fn from_status(status_code: u16, response_status: ResponseStatus) -> Self {
        Self {
            status_code,
            response_status,
        }
    }

    /// Creates a validation fault (status 400).
    ///
    /// The fault takes its code and message from the first field error.
    pub fn validation(errors: Vec<ResponseError>) -> Self {
        let (error_code, message) = errors
            .first()
            .map(|e| (e.error_code.clone(), e.message.clone()))
            .unwrap_or_else(|| ("ValidationException".to_string(), "Validation failed".to_string()));
        Self {
            status_code: 400,
            response_status: ResponseStatus {
                error_code,
                message,
                errors,
                ..Default::default()
            },
        }
    }

    /// Attaches a stack trace or other diagnostic detail.
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.response_status.stack_trace = Some(trace.into());
        self
    }

    /// Attaches a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_status.meta.insert(key.into(), value.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn error_code(&self) -> &str {
        &self.response_status.error_code
    }

    pub fn message(&self) -> &str {
        &self.response_status.message
    }

    /// Field-level errors, if any.
    pub fn errors(&self) -> &[ResponseError] {
        &self.response_status.errors
    }

    pub fn response_status(&self) -> &ResponseStatus {
        &self.response_status
    }

    /// Converts into the wire envelope.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            response_status: self.response_status.clone(),
        }
    }
}

// =============================================================================
// StatusError
// =============================================================================

/// An error that knows how to present itself as a [`ServiceError`].
pub trait StatusError: std::error::Error + Send + Sync + 'static {
    /// The HTTP-style status code. Defaults to 500.
    fn status_code(&self) -> u16 {
        500
    }

    /// The error code. Defaults to the error type's name.
    fn error_code(&self) -> String
    where
        Self: Sized,
    {
        short_type_name::<Self>().to_string()
    }
}

impl<E: StatusError> From<E> for ServiceError {
    fn from(err: E) -> Self {
        Self::new(err.status_code(), err.error_code(), err.to_string())
    }
}

/// Returns the last path segment of `T`'s type name, without generics.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

macro_rules! status_errors {
    ($( $(#[$doc:meta])* $name:ident => $status:literal ),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, PartialEq, Eq, Error)]
            #[error("{0}")]
            pub struct $name(pub String);

            impl $name {
                pub fn new(message: impl Into<String>) -> Self {
                    Self(message.into())
                }
            }

            impl StatusError for $name {
                fn status_code(&self) -> u16 {
                    $status
                }
            }
        )*
    };
}

status_errors! {
    /// An invalid argument (400).
    ArgumentError => 400,
    /// The caller is not authenticated (401).
    UnauthorizedError => 401,
    /// The caller is not allowed to perform the operation (403).
    ForbiddenError => 403,
    /// The target does not exist (404).
    NotFoundError => 404,
    /// No handler is registered for the operation and verb (405).
    NotImplementedError => 405,
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by a remote transport. Never retried by the core.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The remote call timed out.
    #[error("request to {url} timed out")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The remote endpoint answered with a status and body that is not a
    /// structured fault.
    #[error("unexpected HTTP status {status}: {body}")]
    UnexpectedStatus {
        /// The HTTP status.
        status: u16,
        /// The raw body.
        body: String,
    },

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// A blocking call was made outside of a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    RuntimeUnavailable(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl StatusError for TransportError {
    fn status_code(&self) -> u16 {
        match self {
            Self::Timeout { .. } => 504,
            Self::RuntimeUnavailable(_) => 500,
            _ => 502,
        }
    }
}

// =============================================================================
// Gateway Errors
// =============================================================================

/// Errors surfaced by a gateway call.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The operation failed with a structured fault.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The remote transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response could not be read as the operation's response type.
    #[error("unexpected response type: expected '{expected}', got '{got}'")]
    ResponseType {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        got: &'static str,
    },
}

impl GatewayError {
    /// Returns the structured fault, if this is one.
    pub fn as_service(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Service(e) => e,
            GatewayError::Transport(e) => e.into(),
            GatewayError::ResponseType { expected, got } => Self::new(
                500,
                "ResponseTypeError",
                format!("unexpected response type: expected '{expected}', got '{got}'"),
            ),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for dispatch operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Exploded;

    impl StatusError for Exploded {}

    #[test]
    fn error_code_defaults_to_type_name() {
        let err = ServiceError::from(Exploded);
        assert_eq!(err.error_code(), "Exploded");
        assert_eq!(err.message(), "boom");
        assert_eq!(err.status_code(), 500);

        let err = ServiceError::from(ArgumentError::new("bad"));
        assert_eq!(err.error_code(), "ArgumentError");
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn validation_takes_first_error() {
        let err = ServiceError::validation(vec![
            ResponseError::new("Required", "NotEmpty", "'Required' must not be empty."),
            ResponseError::new("Age", "GreaterThan", "'Age' must be greater than '0'."),
        ]);
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "NotEmpty");
        assert_eq!(err.message(), "'Required' must not be empty.");
        assert_eq!(err.errors().len(), 2);
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let err = ServiceError::validation(vec![ResponseError::new("Name", "NotEmpty", "empty")]);
        let json = serde_json::to_value(err.to_response()).unwrap();
        assert_eq!(json["responseStatus"]["errorCode"], "NotEmpty");
        assert_eq!(json["responseStatus"]["errors"][0]["fieldName"], "Name");

        let back: ErrorResponse = serde_json::from_value(json).unwrap();
        assert_eq!(ServiceError::from_status(400, back.response_status), err);
    }

    #[test]
    fn short_names_strip_paths_and_generics() {
        assert_eq!(short_type_name::<ArgumentError>(), "ArgumentError");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }
}
