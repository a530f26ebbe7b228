//! Error types for ground-truth verification.
//!
//! Taxonomy:
//! - Transport: network failure or timeout, always recoverable
//! - Protocol: malformed envelope or missing session header, treated like transport
//! - Engine: the engine answered with `success: false` or a JSON-RPC error
//! - Validation: generated content did not match the expected shape
//! - Policy: bounded-loop caps exceeded, fatal for one generation attempt

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GroundTruthError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Exceeded tool call limit: {attempted} requested against a limit of {limit}")]
    ToolCallLimitExceeded { limit: usize, attempted: usize },

    #[error("Exceeded iteration limit of {limit} without a final answer")]
    IterationLimitExceeded { limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GroundTruthError {
    /// Stable machine-readable code, used in CLI error output
    pub fn code(&self) -> &'static str {
        match self {
            GroundTruthError::Transport(_) => "transport",
            GroundTruthError::Timeout(_) => "timeout",
            GroundTruthError::Protocol(_) => "protocol",
            GroundTruthError::Engine(_) => "engine",
            GroundTruthError::Validation(_) => "validation",
            GroundTruthError::ToolCallLimitExceeded { .. } => "tool_call_limit",
            GroundTruthError::IterationLimitExceeded { .. } => "iteration_limit",
            GroundTruthError::Config(_) => "config",
            GroundTruthError::Cache(_) => "cache",
            GroundTruthError::Io(_) => "io",
            GroundTruthError::Json(_) => "json",
        }
    }

    /// True when the engine could not be reached at all, as opposed to
    /// the engine answering and rejecting the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            GroundTruthError::Transport(_)
                | GroundTruthError::Timeout(_)
                | GroundTruthError::Protocol(_)
        )
    }

    /// Policy violations must reach the caller as an explicit failure
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            GroundTruthError::ToolCallLimitExceeded { .. }
                | GroundTruthError::IterationLimitExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GroundTruthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(GroundTruthError::Transport("refused".into()).is_unavailable());
        assert!(GroundTruthError::Timeout(Duration::from_secs(5)).is_unavailable());
        assert!(GroundTruthError::Protocol("no session header".into()).is_unavailable());
        assert!(!GroundTruthError::Engine("unknown tool".into()).is_unavailable());
    }

    #[test]
    fn test_policy_errors_are_named() {
        let err = GroundTruthError::ToolCallLimitExceeded {
            limit: 100,
            attempted: 105,
        };
        assert!(err.is_policy());
        assert_eq!(err.code(), "tool_call_limit");
        assert!(err.to_string().contains("Exceeded tool call limit"));
    }
}
