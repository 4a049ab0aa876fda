//! Error taxonomy shared across the core.
//!
//! Tool failures, rejections, timeouts, and cancellations are *data* to the
//! ReAct loop (returned as error results); everything else propagates.

/// Core error kinds. Each carries a stable code for the push protocol and
/// bounded detail for callers; internal faults never leak stack traces.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("ingestion backpressure, retry after {retry_after_secs}s")]
    IngestionBackpressure { retry_after_secs: u64 },

    #[error("tool failed [{code}]: {message}")]
    ToolFailed { code: String, message: String },

    #[error("action rejected: {0}")]
    ActionRejected(String),

    #[error("action approval timed out")]
    ActionTimedOut,

    #[error("cancelled")]
    Cancelled,

    #[error("internal error (correlation_id={correlation_id})")]
    Internal { correlation_id: String },
}

impl CoreError {
    /// Stable machine-readable code carried on push `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::Unauthorized(_) => "unauthorized",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::UpstreamUnavailable(_) => "upstream_unavailable",
            CoreError::IngestionBackpressure { .. } => "backpressure",
            CoreError::ToolFailed { .. } => "tool_failed",
            CoreError::ActionRejected(_) => "action_rejected",
            CoreError::ActionTimedOut => "action_timed_out",
            CoreError::Cancelled => "cancelled",
            CoreError::Internal { .. } => "internal",
        }
    }

    /// Whether the ReAct loop observes this error as a tool result rather
    /// than terminating.
    pub fn is_run_survivable(&self) -> bool {
        matches!(
            self,
            CoreError::ToolFailed { .. }
                | CoreError::ActionRejected(_)
                | CoreError::ActionTimedOut
                | CoreError::Validation(_)
        )
    }

    pub fn internal() -> Self {
        CoreError::Internal {
            correlation_id: crate::id::next_id(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survivable_errors_do_not_kill_the_run() {
        assert!(CoreError::ToolFailed {
            code: "x".into(),
            message: "y".into()
        }
        .is_run_survivable());
        assert!(CoreError::ActionTimedOut.is_run_survivable());
        assert!(!CoreError::Cancelled.is_run_survivable());
        assert!(!CoreError::internal().is_run_survivable());
    }
}
