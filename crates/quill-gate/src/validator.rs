//! The gate validator

use crate::checks::{
    check_monotonicity, check_premature_termination, check_scope_containment,
    check_size_conformance,
};
use crate::result::GateResult;
use quill_state::{CanonicalState, Contract};

/// Inputs for one gate evaluation
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    /// Immutable session contract
    pub contract: &'a Contract,
    /// State before the increment's delta was applied
    pub before: &'a CanonicalState,
    /// State after
    pub after: &'a CanonicalState,
    /// The increment text
    pub text: &'a str,
    /// 1-indexed sequence number
    pub sequence: u64,
    /// Whether this is the final increment
    pub is_final: bool,
    /// Requested size for the increment, in words
    pub target_size: u64,
}

/// Runs the fixed check battery over one increment
///
/// Pure over its inputs; never mutates state. Checks are independent and
/// read-only, so they run concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateValidator;

impl GateValidator {
    /// Create a validator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one increment
    pub async fn evaluate(&self, input: GateInput<'_>) -> GateResult {
        let actual_size = word_count(input.text);

        let (monotonicity, scope, termination, size) = futures::join!(
            async { check_monotonicity(input.before, input.after) },
            async { check_scope_containment(input.contract, input.after) },
            async { check_premature_termination(input.text, input.is_final) },
            async { check_size_conformance(actual_size, input.target_size) },
        );

        let result = GateResult::aggregate(
            input.sequence,
            vec![monotonicity, scope, termination, size],
        );

        tracing::debug!(
            sequence = input.sequence,
            status = ?result.status,
            recommendation = ?result.recommendation,
            "gate evaluated"
        );
        result
    }
}

/// Whitespace-separated word count
#[must_use]
pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
