//! Failure report artifact
//!
//! Persisted next to the partial increments when a session fails, so a caller
//! can resume or inspect without re-running from scratch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured error report for a failed session
///
/// Serialized with camelCase keys, like every other JSON artifact in the
/// session directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// Owning session
    pub session_id: String,
    /// Stage the session was in when it failed
    pub failed_stage: String,
    /// Failure message, verbatim
    pub message: String,
    /// `infrastructure` for system faults, `content` for gate judgments
    pub error_class: String,
    /// Fully persisted increments at time of failure
    pub increments_completed: u64,
    /// Total size achieved across those increments
    pub total_size: u64,
    /// Paths of the partial artifacts, relative to the session directory
    pub artifacts: Vec<String>,
    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
}

impl FailureReport {
    /// Build a report
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        failed_stage: impl Into<String>,
        message: impl Into<String>,
        error_class: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            failed_stage: failed_stage.into(),
            message: message.into(),
            error_class: error_class.into(),
            increments_completed: 0,
            total_size: 0,
            artifacts: Vec::new(),
            failed_at: Utc::now(),
        }
    }

    /// With completed-work accounting
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, increments_completed: u64, total_size: u64) -> Self {
        self.increments_completed = increments_completed;
        self.total_size = total_size;
        self
    }

    /// With artifact pointers
    #[inline]
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_json_field_names() {
        let report = FailureReport::new("s1", "draft_generation", "oracle down", "infrastructure")
            .with_progress(2, 4000);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("sessionId").is_some());
        assert!(json.get("failedStage").is_some());
        assert!(json.get("errorClass").is_some());
        assert!(json.get("incrementsCompleted").is_some());
        assert!(json.get("totalSize").is_some());
        assert!(json.get("failedAt").is_some());
    }
}
