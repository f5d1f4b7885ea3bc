//! Assembly and whole-artifact passes
//!
//! Assembly is a deterministic concatenation in manifest order; it performs
//! no content transformation. Whole-artifact passes (audit, refinement) run
//! after assembly and each take the full artifact plus the prior pass's
//! report.

use crate::error::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_store::IncrementFile;
use serde::{Deserialize, Serialize};

/// Separator placed between increments at assembly
pub const INCREMENT_JOIN: &str = "\n\n";

/// Joins persisted increments into one artifact
#[derive(Debug, Clone, Copy, Default)]
pub struct Assembler;

impl Assembler {
    /// Create an assembler
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Concatenate increments in sequence order
    ///
    /// Callers provide increments already ordered; the assembler trusts the
    /// order and only joins.
    #[must_use]
    pub fn assemble(&self, increments: &[IncrementFile]) -> String {
        let mut artifact = String::with_capacity(
            increments.iter().map(|i| i.text.len()).sum::<usize>()
                + INCREMENT_JOIN.len() * increments.len().saturating_sub(1),
        );
        for (index, increment) in increments.iter().enumerate() {
            if index > 0 {
                artifact.push_str(INCREMENT_JOIN);
            }
            artifact.push_str(&increment.text);
        }
        artifact
    }
}

/// Outcome of one whole-artifact pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    /// Pass name
    pub pass: String,
    /// Findings, free-form per pass
    pub findings: Vec<String>,
    /// Whether the pass changed the artifact
    pub modified: bool,
    /// When the pass finished
    pub completed_at: DateTime<Utc>,
}

impl PassReport {
    /// Report with no findings and no modification
    #[must_use]
    pub fn clean(pass: impl Into<String>) -> Self {
        Self {
            pass: pass.into(),
            findings: Vec::new(),
            modified: false,
            completed_at: Utc::now(),
        }
    }

    /// With findings
    #[must_use]
    pub fn with_findings(mut self, findings: Vec<String>) -> Self {
        self.findings = findings;
        self
    }

    /// Mark the artifact as modified
    #[must_use]
    pub fn modified(mut self) -> Self {
        self.modified = true;
        self
    }
}

/// A whole-artifact pass
///
/// Audit implementations typically return the artifact unchanged with
/// findings; refinement implementations return a revised artifact informed
/// by the prior report.
#[async_trait]
pub trait ArtifactPass: Send + Sync {
    /// Stable pass name for reports and events
    fn name(&self) -> &'static str;

    /// Run the pass over the full artifact
    ///
    /// # Errors
    /// `PassFailed` aborts the session; passes that can degrade gracefully
    /// should return the artifact unchanged instead.
    async fn run(
        &self,
        artifact: String,
        prior: Option<&PassReport>,
    ) -> Result<(String, PassReport), PipelineError>;
}
