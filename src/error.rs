//! Error types for the dataplane tool server.
//!
//! Every error the pipeline surfaces carries a stable category (see
//! [`ErrorCategory`]). The category survives context wrapping, so consumers
//! match on [`Error::category`] rather than parsing message prefixes. The
//! reserved `user_declined` category marks elicitation refusals and is
//! distinct from generic failures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error categories recorded by the audit middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input: unknown resolution, unknown breakdown dimension,
    /// invalid instance config.
    Validation,
    /// Multi-connection call without a `connection` argument.
    ConnectionRequired,
    /// Write statement on a read-only toolkit.
    ReadOnly,
    /// Elicitation refused by the user.
    UserDeclined,
    /// Wrapped error from a backend or its driver.
    Backend,
    /// Audit store read/write failure.
    Audit,
    /// Everything else.
    Internal,
}

impl ErrorCategory {
    /// Stable string form, as recorded in audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::ConnectionRequired => "connection_required",
            Self::ReadOnly => "read_only",
            Self::UserDeclined => "user_declined",
            Self::Backend => "backend",
            Self::Audit => "audit",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for all dataplane operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input.
    #[error("{0}")]
    Validation(String),

    /// A `connection` argument is required when multiple backends exist.
    #[error("{0}")]
    ConnectionRequired(String),

    /// Write statement rejected on a read-only toolkit.
    ///
    /// The message text is part of the public contract.
    #[error("write operations not allowed in read-only mode")]
    ReadOnly,

    /// The user declined an elicitation prompt.
    #[error("{0}")]
    UserDeclined(String),

    /// Backend or driver failure.
    #[error("{message}")]
    Backend {
        /// Human-readable description.
        message: String,
        /// Underlying driver error, when available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Audit store failure.
    #[error("{message}")]
    Audit {
        /// Human-readable description.
        message: String,
        /// Underlying database error, when available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The call's cancellation signal fired.
    #[error("request cancelled")]
    Cancelled,

    /// Everything else.
    #[error("{0}")]
    Internal(String),

    /// Contextual wrapper. Preserves the wrapped error for source-chain
    /// matching and reports its category.
    #[error("{context}: {source}")]
    Context {
        /// Added context.
        context: String,
        /// The wrapped error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a connection-required error.
    pub fn connection_required(message: impl Into<String>) -> Self {
        Self::ConnectionRequired(message.into())
    }

    /// Create a user-declined error.
    pub fn user_declined(message: impl Into<String>) -> Self {
        Self::UserDeclined(message.into())
    }

    /// Create a backend error from a message alone.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Create a backend error wrapping a driver error.
    pub fn backend_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an audit error from a message alone.
    pub fn audit(message: impl Into<String>) -> Self {
        Self::Audit {
            message: message.into(),
            source: None,
        }
    }

    /// Create an audit error wrapping a database error.
    pub fn audit_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Audit {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap this error with additional context.
    ///
    /// The original error stays reachable through the source chain and its
    /// category is preserved.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The stable category of this error, looking through context wrappers.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::ConnectionRequired(_) => ErrorCategory::ConnectionRequired,
            Self::ReadOnly => ErrorCategory::ReadOnly,
            Self::UserDeclined(_) => ErrorCategory::UserDeclined,
            Self::Backend { .. } => ErrorCategory::Backend,
            Self::Audit { .. } => ErrorCategory::Audit,
            Self::Cancelled | Self::Internal(_) => ErrorCategory::Internal,
            Self::Context { source, .. } => source.category(),
        }
    }

    /// True when this error (possibly wrapped) is an elicitation refusal.
    pub fn is_user_declined(&self) -> bool {
        self.category() == ErrorCategory::UserDeclined
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::audit_source("audit store operation failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_strings_are_stable() {
        assert_eq!(ErrorCategory::Validation.as_str(), "validation");
        assert_eq!(
            ErrorCategory::ConnectionRequired.as_str(),
            "connection_required"
        );
        assert_eq!(ErrorCategory::ReadOnly.as_str(), "read_only");
        assert_eq!(ErrorCategory::UserDeclined.as_str(), "user_declined");
        assert_eq!(ErrorCategory::Backend.as_str(), "backend");
        assert_eq!(ErrorCategory::Audit.as_str(), "audit");
        assert_eq!(ErrorCategory::Internal.as_str(), "internal");
    }

    #[test]
    fn category_survives_wrapping() {
        let err = Error::user_declined("query estimated to scan 10,000,000 rows")
            .with_context("cost gate")
            .with_context("query tool");

        assert_eq!(err.category(), ErrorCategory::UserDeclined);
        assert!(err.is_user_declined());
        assert!(err.to_string().contains("cost gate"));
    }

    #[test]
    fn wrapped_error_stays_on_source_chain() {
        use std::error::Error as _;

        let err = Error::validation("unknown resolution").with_context("timeseries");
        let source = err.source().expect("wrapped source");
        assert_eq!(source.to_string(), "unknown resolution");
    }

    #[test]
    fn read_only_message_is_exact() {
        assert_eq!(
            Error::ReadOnly.to_string(),
            "write operations not allowed in read-only mode"
        );
    }

    #[test]
    fn user_declined_distinct_from_generic_failure() {
        assert!(!Error::backend("boom").is_user_declined());
        assert!(!Error::internal("boom").is_user_declined());
        assert!(Error::user_declined("no").is_user_declined());
    }
}
