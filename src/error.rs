use crate::protocol::canonical::FinishReason;

/// Errors that terminate a stream or a setup step and reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Vendor stream error: {0}")]
    Vendor(String),
}

/// A single frame could not be understood. Never fatal to the stream.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed {vendor} frame: {source}")]
    Json {
        vendor: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Continuity payload decode failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("payload does not start with the continuity magic")]
    BadMagic,
    #[error("unsupported continuity payload version {0}")]
    UnsupportedVersion(u8),
    #[error("payload truncated while reading {0}")]
    Truncated(&'static str),
    #[error("unknown protocol variant {0:?}")]
    UnknownProtocol(String),
    #[error("field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("required field {0} missing")]
    MissingField(&'static str),
}

/// How a stream ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { finish_reason: FinishReason },
    Cancelled,
}

impl StreamOutcome {
    #[must_use]
    pub fn is_cancelled(self) -> bool {
        matches!(self, StreamOutcome::Cancelled)
    }
}

/// Broad error category, used by the outer retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    ServerError,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 | 404 | 413 | 422 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::Upstream { status, .. } => category_from_upstream_status(*status),
            RelayError::Transport(_) | RelayError::Vendor(_) => ErrorCategory::ServerError,
        }
    }
}
