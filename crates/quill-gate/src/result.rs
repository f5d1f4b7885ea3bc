//! Gate verdicts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-check verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Check passed
    Pass,
    /// Recoverable concern
    Warn,
    /// Check failed
    Fail,
}

/// Overall gate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    /// All checks passed
    Pass,
    /// Warnings only
    PassWithWarnings,
    /// At least one critical failure
    Fail,
}

/// What the controller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    /// Continue generating
    Proceed,
    /// Continue, but the warnings deserve attention
    ProceedWithCaution,
    /// Halt the session and surface the failure
    Stop,
}

/// One check's finding with evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFinding {
    /// Check name
    pub check: String,
    /// Verdict
    pub verdict: Verdict,
    /// Whether a failure here is critical (never resettable)
    pub critical: bool,
    /// Human-readable evidence
    pub evidence: String,
}

impl CheckFinding {
    /// Passing finding
    #[must_use]
    pub fn pass(check: &str, evidence: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            verdict: Verdict::Pass,
            critical: false,
            evidence: evidence.into(),
        }
    }

    /// Warning finding
    #[must_use]
    pub fn warn(check: &str, evidence: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            verdict: Verdict::Warn,
            critical: false,
            evidence: evidence.into(),
        }
    }

    /// Critical failure finding
    #[must_use]
    pub fn fail(check: &str, evidence: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            verdict: Verdict::Fail,
            critical: true,
            evidence: evidence.into(),
        }
    }
}

/// Aggregated per-increment verdict; persisted as an audit artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    /// Increment judged
    pub sequence: u64,
    /// Overall status
    pub status: GateStatus,
    /// Evidence from critical failures
    pub critical_failures: Vec<String>,
    /// Evidence from warnings
    pub warnings: Vec<String>,
    /// What the controller should do
    pub recommendation: Recommendation,
    /// All findings, in battery order
    pub findings: Vec<CheckFinding>,
    /// When the gate ran
    pub evaluated_at: DateTime<Utc>,
}

impl GateResult {
    /// Aggregate findings into a verdict
    ///
    /// Any critical FAIL means FAIL/STOP; any WARN with no FAIL means
    /// PASS_WITH_WARNINGS/PROCEED_WITH_CAUTION; otherwise PASS/PROCEED.
    #[must_use]
    pub fn aggregate(sequence: u64, findings: Vec<CheckFinding>) -> Self {
        let critical_failures: Vec<String> = findings
            .iter()
            .filter(|f| f.verdict == Verdict::Fail && f.critical)
            .map(|f| format!("{}: {}", f.check, f.evidence))
            .collect();
        let warnings: Vec<String> = findings
            .iter()
            .filter(|f| f.verdict == Verdict::Warn)
            .map(|f| format!("{}: {}", f.check, f.evidence))
            .collect();

        let (status, recommendation) = if !critical_failures.is_empty() {
            (GateStatus::Fail, Recommendation::Stop)
        } else if !warnings.is_empty() {
            (
                GateStatus::PassWithWarnings,
                Recommendation::ProceedWithCaution,
            )
        } else {
            (GateStatus::Pass, Recommendation::Proceed)
        };

        Self {
            sequence,
            status,
            critical_failures,
            warnings,
            recommendation,
            findings,
            evaluated_at: Utc::now(),
        }
    }

    /// True when the controller must halt
    #[inline]
    #[must_use]
    pub fn must_stop(&self) -> bool {
        self.recommendation == Recommendation::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_pass_aggregates_to_proceed() {
        let result = GateResult::aggregate(1, vec![CheckFinding::pass("a", "ok")]);
        assert_eq!(result.status, GateStatus::Pass);
        assert_eq!(result.recommendation, Recommendation::Proceed);
        assert!(!result.must_stop());
    }

    #[test]
    fn warn_without_fail_is_caution() {
        let result = GateResult::aggregate(
            1,
            vec![CheckFinding::pass("a", "ok"), CheckFinding::warn("b", "drift")],
        );
        assert_eq!(result.status, GateStatus::PassWithWarnings);
        assert_eq!(result.recommendation, Recommendation::ProceedWithCaution);
    }

    #[test]
    fn any_critical_fail_stops() {
        let result = GateResult::aggregate(
            1,
            vec![
                CheckFinding::warn("a", "drift"),
                CheckFinding::fail("b", "counter decreased"),
            ],
        );
        assert_eq!(result.status, GateStatus::Fail);
        assert!(result.must_stop());
        assert_eq!(result.critical_failures.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&GateStatus::PassWithWarnings).unwrap();
        assert_eq!(json, "\"PASS_WITH_WARNINGS\"");
        let json = serde_json::to_string(&Recommendation::ProceedWithCaution).unwrap();
        assert_eq!(json, "\"PROCEED_WITH_CAUTION\"");
    }
}
