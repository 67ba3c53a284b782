//! Usage reporting interface consumed by the stream driver.

use std::fmt;

use tracing::info;

use crate::protocol::canonical::Usage;

/// Terminal status recorded alongside actual usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
            RequestStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("usage sink unavailable: {0}")]
    Unavailable(String),
    #[error("unknown request id {0}")]
    UnknownRequest(String),
}

/// Destination for token accounting. Failures never fail a request; the
/// driver logs them and moves on.
pub trait UsageSink: Send + Sync {
    /// Called once at stream start with a local estimate.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError`] when the sink cannot record the estimate.
    fn record_estimated_tokens(
        &self,
        request_id: &str,
        model_id: &str,
        estimated_input_tokens: u64,
    ) -> Result<(), UsageError>;

    /// Called once when the stream ends, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError`] when the sink cannot record the update.
    fn update_actual_tokens(
        &self,
        request_id: &str,
        usage: Usage,
        status: RequestStatus,
    ) -> Result<(), UsageError>;
}

/// Writes usage as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn record_estimated_tokens(
        &self,
        request_id: &str,
        model_id: &str,
        estimated_input_tokens: u64,
    ) -> Result<(), UsageError> {
        info!(
            request_id,
            model = model_id,
            estimated_input_tokens,
            "request started"
        );
        Ok(())
    }

    fn update_actual_tokens(
        &self,
        request_id: &str,
        usage: Usage,
        status: RequestStatus,
    ) -> Result<(), UsageError> {
        info!(
            request_id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cached_tokens = usage.cached_tokens.unwrap_or(0),
            %status,
            "request completed"
        );
        Ok(())
    }
}
