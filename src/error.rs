//! Error types for the query dispatch engine.
//!
//! Every failure is classified into one of a small set of categories so the
//! dispatcher can decide uniformly whether to retry, and so upstream
//! handlers can map failures to status codes deterministically. No error
//! ever escapes the dispatcher as a fault; all of them surface as a failed
//! [`QueryResult`](crate::types::QueryResult).

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before any backend I/O (unknown kind, empty query,
    /// malformed params).
    #[error("validation error: {message}")]
    Validation {
        /// What was wrong with the request.
        message: String,
    },

    /// Pool exhausted within the request deadline.
    #[error("capacity error: {message}")]
    Capacity {
        /// Pool and wait details.
        message: String,
    },

    /// Backend momentarily unavailable (connection reset, deadlock,
    /// service overloaded). Safe to retry on a fresh connection.
    #[error("transient backend error: {message}")]
    TransientBackend {
        /// Backend failure details.
        message: String,
        /// Underlying driver error, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Caller-fixable backend failure (bad query, auth failure, policy
    /// violation). Never retried.
    #[error("backend error: {message}")]
    PermanentBackend {
        /// Backend failure details.
        message: String,
        /// Protocol status code, when the backend speaks HTTP.
        status: Option<u16>,
        /// Underlying driver error, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Deadline exceeded while waiting for a handle or for backend I/O.
    #[error("timeout: {message}")]
    Timeout {
        /// Which stage ran out of time.
        message: String,
    },

    /// Invariant violation inside the engine itself.
    #[error("internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a capacity error.
    pub fn capacity(message: impl Into<String>) -> Self {
        Self::Capacity {
            message: message.into(),
        }
    }

    /// Create a transient backend error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientBackend {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient backend error wrapping a driver error.
    pub fn transient_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransientBackend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a permanent backend error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::PermanentBackend {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Create a permanent backend error carrying a protocol status code.
    pub fn permanent_status(message: impl Into<String>, status: u16) -> Self {
        Self::PermanentBackend {
            message: message.into(),
            status: Some(status),
            source: None,
        }
    }

    /// Create a permanent backend error wrapping a driver error.
    pub fn permanent_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::PermanentBackend {
            message: message.into(),
            status: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Category of this error.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Capacity { .. } => ErrorCategory::Capacity,
            Self::TransientBackend { .. } => ErrorCategory::Transient,
            Self::PermanentBackend { .. } => ErrorCategory::Permanent,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether the dispatcher may retry this failure on a fresh connection.
    pub const fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// HTTP status code carried by a permanent backend error, if any.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::PermanentBackend { status, .. } => *status,
            _ => None,
        }
    }
}

/// Broad classification used for retry decisions and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected before any I/O.
    Validation,
    /// Pool exhausted.
    Capacity,
    /// Retry-safe backend failure.
    Transient,
    /// Caller-fixable backend failure.
    Permanent,
    /// Deadline exceeded.
    Timeout,
    /// Engine invariant violation.
    Internal,
}

impl ErrorCategory {
    /// Only transient backend failures are retried. A timed-out or
    /// capacity-starved request has already spent its deadline.
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Capacity => "capacity",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}
