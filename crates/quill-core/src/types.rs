//! Session types
//!
//! Defines the fundamental types for the pipeline:
//! - Session identity and lifecycle record
//! - Stage state machine
//! - Per-session configuration

use chrono::{DateTime, Utc};
use quill_state::Contract;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ulid::Ulid;

/// Unique session identifier (ULID, sortable by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate a new session id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stage
///
/// Transitions are one-directional; the only loop is inside
/// `DraftGeneration`'s increment cycle. `Failed` is reachable from every
/// non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Session created, nothing run yet
    Init,
    /// Increment loop in progress
    DraftGeneration,
    /// Combining increments into one artifact
    Assembly,
    /// Optional whole-artifact audit pass
    Audit,
    /// Optional whole-artifact refinement pass
    Refinement,
    /// Handing the artifact off for packaging
    Packaging,
    /// Terminal success
    Complete,
    /// Terminal failure; partial artifacts preserved
    Failed,
}

impl Stage {
    /// Stages reachable from this one
    #[must_use]
    pub fn allowed_transitions(self) -> Vec<Stage> {
        use Stage::*;
        match self {
            Init => vec![DraftGeneration, Failed],
            // Audit and refinement are skippable per session configuration.
            DraftGeneration => vec![Assembly, Failed],
            Assembly => vec![Audit, Refinement, Packaging, Failed],
            Audit => vec![Refinement, Packaging, Failed],
            Refinement => vec![Packaging, Failed],
            Packaging => vec![Complete, Failed],
            Complete | Failed => vec![],
        }
    }

    /// Whether a transition to `to` is legal
    #[inline]
    #[must_use]
    pub fn can_advance_to(self, to: Stage) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Terminal stages accept no further transitions
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }

    /// Stable name used in events and reports
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::DraftGeneration => "draft_generation",
            Stage::Assembly => "assembly",
            Stage::Audit => "audit",
            Stage::Refinement => "refinement",
            Stage::Packaging => "packaging",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One generation run
///
/// Owned exclusively by the stage controller; mutated only as stages advance.
/// Never deleted during the run; the registry garbage-collects terminal
/// sessions after a retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub id: SessionId,
    /// Current stage
    pub stage: Stage,
    /// Target artifact size in words
    pub target_size: u64,
    /// Immutable contract for the session's lifetime
    pub contract: Contract,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a session in `Init`
    #[must_use]
    pub fn new(target_size: u64, contract: Contract) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            stage: Stage::Init,
            target_size,
            contract,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Requested size per increment, in words
    pub chunk_size: u64,
    /// Tolerance band requested of the generator, as a fraction of target
    pub size_tolerance: f64,
    /// Run the gate after every increment
    pub gate_every_increment: bool,
    /// Run the whole-artifact audit stage (skipped if no pass is registered)
    pub run_audit: bool,
    /// Run the whole-artifact refinement stage
    pub run_refinement: bool,
    /// Re-extract deltas over all increments before the audit stage
    pub reextract_before_audit: bool,
    /// Generation retries before the session fails
    pub max_generation_retries: u32,
    /// Base delay for retry backoff; doubles per attempt
    pub retry_base_delay: Duration,
    /// Time budget per generation oracle call
    pub generation_budget: Duration,
    /// Time budget per extraction oracle call
    pub extraction_budget: Duration,
    /// Time budget per stage
    pub stage_budget: Duration,
    /// Heartbeat emission interval
    pub heartbeat_interval: Duration,
}

impl SessionConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With chunk size
    #[inline]
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// With gate cadence
    #[inline]
    #[must_use]
    pub fn with_gate_every_increment(mut self, enabled: bool) -> Self {
        self.gate_every_increment = enabled;
        self
    }

    /// With generation retry count
    #[inline]
    #[must_use]
    pub fn with_max_generation_retries(mut self, retries: u32) -> Self {
        self.max_generation_retries = retries;
        self
    }

    /// With per-stage budget
    #[inline]
    #[must_use]
    pub fn with_stage_budget(mut self, budget: Duration) -> Self {
        self.stage_budget = budget;
        self
    }

    /// With heartbeat interval
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// With the post-hoc re-extraction sweep enabled
    #[inline]
    #[must_use]
    pub fn with_reextract_before_audit(mut self, enabled: bool) -> Self {
        self.reextract_before_audit = enabled;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            size_tolerance: 0.1,
            gate_every_increment: true,
            run_audit: true,
            run_refinement: true,
            reextract_before_audit: false,
            max_generation_retries: 2,
            retry_base_delay: Duration::from_secs(2),
            generation_budget: Duration::from_secs(300),
            extraction_budget: Duration::from_secs(60),
            stage_budget: Duration::from_secs(3600),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_sortable() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(a <= b);
    }

    #[test]
    fn stage_transitions_are_one_directional() {
        assert!(Stage::Init.can_advance_to(Stage::DraftGeneration));
        assert!(Stage::DraftGeneration.can_advance_to(Stage::Assembly));
        assert!(!Stage::Assembly.can_advance_to(Stage::DraftGeneration));
        assert!(!Stage::Complete.can_advance_to(Stage::Failed));
    }

    #[test]
    fn failed_is_reachable_from_every_non_terminal_stage() {
        for stage in [
            Stage::Init,
            Stage::DraftGeneration,
            Stage::Assembly,
            Stage::Audit,
            Stage::Refinement,
            Stage::Packaging,
        ] {
            assert!(stage.can_advance_to(Stage::Failed), "{stage} cannot fail");
        }
    }

    #[test]
    fn optional_stages_are_skippable() {
        assert!(Stage::Assembly.can_advance_to(Stage::Packaging));
        assert!(Stage::Assembly.can_advance_to(Stage::Refinement));
        assert!(Stage::Audit.can_advance_to(Stage::Packaging));
    }

    #[test]
    fn config_builder() {
        let config = SessionConfig::new()
            .with_chunk_size(1500)
            .with_max_generation_retries(5);
        assert_eq!(config.chunk_size, 1500);
        assert_eq!(config.max_generation_retries, 5);
    }
}
