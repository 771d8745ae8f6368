use std::time::Duration;

use snafu::Snafu;

/// Categories of errors for classification and handling.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration, needs user fix
    Configuration,

    /// Invalid input, user error
    Validation,

    /// Network/IO errors or timeouts, retry possible
    Temporary,

    /// The target refused the request and will keep refusing it
    Permanent,

    /// Bugs, system errors
    Internal,
}

/// Session-level errors.
///
/// These are returned to the caller of the session API. Per-record problems
/// never show up here, they are reported as outcomes instead.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// The session configuration is inconsistent.
    #[snafu(display("invalid session configuration: {message}"))]
    InvalidConfig { message: String },
    /// The caller reused or rewound a sequence number.
    #[snafu(display(
        "sequence number {seq} must be greater than the last admitted sequence number {last}"
    ))]
    SequenceNotMonotonic { seq: u64, last: u64 },
    /// The background pipeline is gone.
    #[snafu(display("session closed"))]
    SessionClosed,
    /// A background task panicked or was aborted.
    #[snafu(display("background task failed: {message}"))]
    TaskJoin { message: String },
}

/// Errors returned by an ingestion target for a whole batch.
///
/// The message is attached to the failed outcome of every record in the batch,
/// for this reason it should contain information that is useful to the user.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum DispatchError {
    /// Connection reset, overload, leader change and the like.
    #[snafu(display("transient dispatch error: {message}"))]
    Transient { message: String },
    /// The target will never accept this batch, for example because it does
    /// not recognize the schema.
    #[snafu(display("permanent dispatch error: {message}"))]
    Permanent { message: String },
    /// A single attempt took longer than the per-attempt timeout.
    #[snafu(display("dispatch attempt timed out after {}ms", timeout.as_millis()))]
    Timeout { timeout: Duration },
}

/// Record validation errors.
///
/// Validation is local and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ValidationError {
    #[snafu(display("missing required field '{field}'"))]
    MissingField { field: String },
    #[snafu(display("field '{field}' expected {expected} but found {found}"))]
    TypeMismatch {
        field: String,
        expected: String,
        found: &'static str,
    },
    #[snafu(display("field '{field}' violates constraint: {message}"))]
    ConstraintViolation { field: String, message: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

impl ErrorKind {
    /// Whether this error is retryable.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Temporary)
    }
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } | Self::Timeout { .. } => ErrorKind::Temporary,
            Self::Permanent { .. } => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl ValidationError {
    /// The name of the field that failed validation.
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field }
            | Self::TypeMismatch { field, .. }
            | Self::ConstraintViolation { field, .. } => field,
        }
    }
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig { .. } => ErrorKind::Configuration,
            Self::SequenceNotMonotonic { .. } => ErrorKind::Validation,
            Self::SessionClosed | Self::TaskJoin { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_retryable() {
        let err = DispatchError::Timeout {
            timeout: Duration::from_millis(250),
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "dispatch attempt timed out after 250ms");
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        let err = DispatchError::Permanent {
            message: "unknown collection".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }
}
