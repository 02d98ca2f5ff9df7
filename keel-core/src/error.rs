//! Error sentinels shared by every keel component.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Underlying cause carried by [`Error::Internal`].
pub type BoxError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used across keel.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The kind of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Forbidden,
    Internal,
    Cancelled,
    CircuitOpen,
    HandlerNotFound,
    AlreadyRegistered,
    MiddlewareBlocked,
}

impl ErrorKind {
    /// Stable lowercase name, suitable for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::BadRequest => "bad_request",
            Self::Forbidden => "forbidden",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
            Self::CircuitOpen => "circuit_open",
            Self::HandlerNotFound => "handler_not_found",
            Self::AlreadyRegistered => "already_registered",
            Self::MiddlewareBlocked => "middleware_blocked",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned at the keel module boundary.
///
/// Every failure maps to exactly one variant. Adapter errors that have no
/// better home are wrapped as [`Error::Internal`] with the cause preserved.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("Handler not found for {0}")]
    HandlerNotFound(String),

    #[error("Handler already registered for {0}")]
    AlreadyRegistered(String),

    #[error("Blocked by middleware: {0}")]
    MiddlewareBlocked(String),
}

impl Error {
    /// Internal error without a cause.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a foreign error as [`Error::Internal`], keeping it as the source.
    pub fn wrap<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: cause.to_string(),
            source: Some(Arc::new(cause)),
        }
    }

    /// Wrap a foreign error with an explanatory message.
    pub fn wrap_with<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Arc::new(cause)),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::HandlerNotFound(_) => ErrorKind::HandlerNotFound,
            Self::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            Self::MiddlewareBlocked(_) => ErrorKind::MiddlewareBlocked,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    pub fn is_circuit_open(&self) -> bool {
        self.kind() == ErrorKind::CircuitOpen
    }

    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::wrap_with(format!("Serialization error: {}", err), err)
    }
}
