//! Structured error type shared by every advisor component
//!
//! Each variant carries the failing operation and a message; retryability is
//! a property of the error class, not the call site.

use thiserror::Error;

/// Application error with operation context and a retryable flag.
#[derive(Error, Debug)]
pub enum AdvisorError {
    /// Caller-supplied data is invalid. Never retryable.
    #[error("[VALIDATION] {operation}: {message}")]
    Validation { operation: String, message: String },

    /// A scheduler command failed or produced unparseable output.
    #[error("[SCHEDULER] {operation}: {message}")]
    Scheduler {
        operation: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The pricing collaborator failed.
    #[error("[PRICING] {operation}: {message}")]
    Pricing {
        operation: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The budget collaborator failed. Always non-fatal to the decision.
    #[error("[BUDGET] {operation}: {message}")]
    Budget {
        operation: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The history store rejected a read or write.
    #[error("[STORE] {operation}: {message}")]
    Store {
        operation: String,
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// An internal analysis step failed.
    #[error("[ANALYSIS] {operation}: {message}")]
    Analysis { operation: String, message: String },

    /// The analysis deadline was crossed before both venues reported.
    #[error("[DEADLINE] {operation}: analysis did not complete within {seconds}s")]
    Deadline { operation: String, seconds: u64 },

    /// Filesystem or credential configuration problem. Never retryable.
    #[error("[PERMISSION] {operation}: {message}")]
    Permission {
        operation: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AdvisorError {
    pub fn validation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn scheduler(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Scheduler {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn analysis(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Analysis {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn store(
        operation: impl Into<String>,
        message: impl Into<String>,
        source: rusqlite::Error,
    ) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Short machine-readable class name, used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Scheduler { .. } => "scheduler",
            Self::Pricing { .. } => "pricing",
            Self::Budget { .. } => "budget",
            Self::Store { .. } => "store",
            Self::Analysis { .. } => "analysis",
            Self::Deadline { .. } => "deadline",
            Self::Permission { .. } => "permission",
        }
    }

    /// Whether retrying the same call might succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Scheduler { .. }
                | Self::Pricing { .. }
                | Self::Budget { .. }
                | Self::Analysis { .. }
                | Self::Deadline { .. }
        )
    }

    /// Process exit code for the CLI: 1 validation, 2 collaborator, 3 deadline.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => 1,
            Self::Deadline { .. } => 3,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, AdvisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(!AdvisorError::validation("op", "bad input").retryable());
        assert!(AdvisorError::scheduler("op", "sinfo failed").retryable());
        assert!(AdvisorError::Deadline {
            operation: "analyze".into(),
            seconds: 30
        }
        .retryable());
        assert!(!AdvisorError::Permission {
            operation: "open".into(),
            message: "denied".into(),
            source: None
        }
        .retryable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AdvisorError::validation("op", "m").exit_code(), 1);
        assert_eq!(AdvisorError::scheduler("op", "m").exit_code(), 2);
        assert_eq!(
            AdvisorError::Deadline {
                operation: "analyze".into(),
                seconds: 30
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn test_display_includes_operation() {
        let err = AdvisorError::validation("parse_batch_script", "nodes must be positive");
        let text = err.to_string();
        assert!(text.contains("VALIDATION"));
        assert!(text.contains("parse_batch_script"));
    }
}
