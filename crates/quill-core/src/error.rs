//! Error taxonomy for the pipeline
//!
//! Infrastructure errors (generation after retries, persistence) abort the
//! session and surface verbatim. Content-judgment failures (gate STOP) abort
//! with a structured explanation so a caller can distinguish "the system
//! broke" from "the output broke its own rules". Every failure path leaves
//! the session's partial artifacts loadable.

use crate::types::Stage;
use quill_state::StateError;
use quill_store::StoreError;

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Generation oracle failed after the bounded retry count
    #[error("generation failed after {attempts} attempt(s): {message}")]
    GenerationFailed {
        /// Attempts made, including the first call
        attempts: u32,
        /// Last oracle error, verbatim
        message: String,
    },

    /// Atomic persistence failed; fatal, prior work preserved
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// Gate validator returned STOP
    #[error("gate stopped the session at increment {sequence}")]
    GateFailure {
        /// Increment that failed the gate
        sequence: u64,
        /// Critical failure evidence
        failures: Vec<String>,
    },

    /// A stage exceeded its time budget
    #[error("stage {stage} exceeded its {budget_secs}s budget")]
    StageTimeout {
        /// Stage that timed out
        stage: Stage,
        /// Budget that was exceeded
        budget_secs: u64,
    },

    /// Cooperative cancellation between increments
    #[error("session cancelled")]
    Cancelled,

    /// Contract failed validation at session init
    #[error("invalid contract: {0}")]
    Contract(#[from] StateError),

    /// Stage machine rejected a transition
    #[error("illegal stage transition {from} -> {to}")]
    IllegalTransition {
        /// Current stage
        from: Stage,
        /// Requested stage
        to: Stage,
    },

    /// Both assembly tiers failed
    #[error("assembly failed: {0}")]
    AssemblyFailed(String),

    /// A whole-artifact pass failed
    #[error("pass '{pass}' failed: {message}")]
    PassFailed {
        /// Pass name
        pass: String,
        /// Failure message
        message: String,
    },
}

impl PipelineError {
    /// `infrastructure` or `content`, for the failure report
    ///
    /// Gate failures reflect a content-quality judgment, not a system fault;
    /// callers may resume, adjust parameters, or accept partial output.
    #[inline]
    #[must_use]
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::GateFailure { .. } => "content",
            _ => "infrastructure",
        }
    }

    /// Whether the caller could retry the whole session as-is
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailed { .. } | Self::StageTimeout { .. } | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_failure_is_content_class() {
        let err = PipelineError::GateFailure {
            sequence: 2,
            failures: vec!["counter decreased".to_string()],
        };
        assert_eq!(err.error_class(), "content");
        assert!(!err.is_retryable());
    }

    #[test]
    fn generation_failure_is_infrastructure_and_retryable() {
        let err = PipelineError::GenerationFailed {
            attempts: 3,
            message: "timed out".to_string(),
        };
        assert_eq!(err.error_class(), "infrastructure");
        assert!(err.is_retryable());
    }

    #[test]
    fn display_includes_stage_budget() {
        let err = PipelineError::StageTimeout {
            stage: Stage::DraftGeneration,
            budget_secs: 60,
        };
        assert!(err.to_string().contains("draft_generation"));
        assert!(err.to_string().contains("60s"));
    }
}
