//! The check battery
//!
//! Each check is a pure function over the gate input producing one finding.
//! Checks never mutate state and never look at each other's output.

use crate::result::CheckFinding;
use once_cell::sync::Lazy;
use quill_state::{CanonicalState, Contract};
use regex::Regex;

/// Terminal language that must not appear in a non-final increment
static TERMINAL_LANGUAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:the\s+end|fin|epilogue|~\s*end\s*~)\s*[.!]?\s*$")
        .unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// How much of the text tail the termination scan covers
const TERMINATION_SCAN_TAIL: usize = 400;

/// Every tracked counter in `after` must be >= its value in `before`
///
/// A decrease is always a critical failure; escalation never resets.
#[must_use]
pub fn check_monotonicity(before: &CanonicalState, after: &CanonicalState) -> CheckFinding {
    const NAME: &str = "invariant_monotonicity";

    let before_counters = before.counters();
    let after_counters = after.counters();

    for (name, prior) in &before_counters {
        let current = after_counters.get(name).copied().unwrap_or(0);
        if current < *prior {
            return CheckFinding::fail(
                NAME,
                format!("counter {name} decreased from {prior} to {current}"),
            );
        }
    }

    for capability in before.acquired_capabilities() {
        if !after.acquired_capabilities().contains(&capability) {
            return CheckFinding::fail(
                NAME,
                format!("capability {capability} was revoked"),
            );
        }
    }

    if after.timeline.len() < before.timeline.len() {
        return CheckFinding::fail(
            NAME,
            format!(
                "timeline shrank from {} to {} commitments",
                before.timeline.len(),
                after.timeline.len()
            ),
        );
    }

    CheckFinding::pass(NAME, format!("{} counters checked", before_counters.len()))
}

/// The slot collection must not exceed the contracted count
#[must_use]
pub fn check_scope_containment(contract: &Contract, after: &CanonicalState) -> CheckFinding {
    const NAME: &str = "scope_containment";

    let count = after.slot_count();
    if count > contract.max_rule_slots {
        return CheckFinding::fail(
            NAME,
            format!(
                "{count} rule slots exceed the contracted {}",
                contract.max_rule_slots
            ),
        );
    }
    CheckFinding::pass(
        NAME,
        format!("{count} of {} contracted slots in use", contract.max_rule_slots),
    )
}

/// A non-final increment must not conclude the artifact
#[must_use]
pub fn check_premature_termination(text: &str, is_final: bool) -> CheckFinding {
    const NAME: &str = "premature_termination";

    if is_final {
        return CheckFinding::pass(NAME, "final increment; terminal language allowed");
    }

    let tail_start = text.len().saturating_sub(TERMINATION_SCAN_TAIL);
    // Back up to a char boundary so the slice stays valid.
    let tail_start = (0..=tail_start)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0);
    let tail = &text[tail_start..];

    if let Some(found) = TERMINAL_LANGUAGE.find(tail) {
        return CheckFinding::fail(
            NAME,
            format!("terminal language {:?} in non-final increment", found.as_str().trim()),
        );
    }
    CheckFinding::pass(NAME, "no terminal language detected")
}

/// Size drift outside the tolerance band is a warning, not a failure
#[must_use]
pub fn check_size_conformance(actual_size: u64, target_size: u64) -> CheckFinding {
    const NAME: &str = "size_conformance";
    const MIN_RATIO: f64 = 0.5;
    const MAX_RATIO: f64 = 1.5;

    if target_size == 0 {
        return CheckFinding::pass(NAME, "no target size requested");
    }

    #[allow(clippy::cast_precision_loss)]
    let ratio = actual_size as f64 / target_size as f64;
    if !(MIN_RATIO..=MAX_RATIO).contains(&ratio) {
        return CheckFinding::warn(
            NAME,
            format!("size {actual_size} is {ratio:.2}x the target {target_size}"),
        );
    }
    CheckFinding::pass(
        NAME,
        format!("size {actual_size} within tolerance of target {target_size}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Verdict;
    use quill_state::{SlotSeed, StateDelta, StateUpdater};

    fn base_state() -> (Contract, CanonicalState) {
        let contract = Contract::new(3).with_slot(SlotSeed::new("r1").with_threshold(3));
        let state = CanonicalState::from_contract(&contract);
        (contract, state)
    }

    #[test]
    fn monotonicity_passes_on_growth() {
        let (_, before) = base_state();
        let mut after = before.clone();
        StateUpdater::new().apply(&mut after, &StateDelta::empty().with_violation("r1"), 1);

        let finding = check_monotonicity(&before, &after);
        assert_eq!(finding.verdict, Verdict::Pass);
    }

    #[test]
    fn monotonicity_fails_on_decrease() {
        let (_, after) = base_state();
        let mut before = after.clone();
        StateUpdater::new().apply(&mut before, &StateDelta::empty().with_violation("r1"), 1);

        // `after` is the untouched state, so the violation count went 1 -> 0.
        let finding = check_monotonicity(&before, &after);
        assert_eq!(finding.verdict, Verdict::Fail);
        assert!(finding.critical);
        assert!(finding.evidence.contains("slot:r1"));
    }

    #[test]
    fn scope_containment_limits_slot_count() {
        let (contract, state) = base_state();
        assert_eq!(
            check_scope_containment(&contract, &state).verdict,
            Verdict::Pass
        );

        let bloated = Contract::new(3)
            .with_slot(SlotSeed::new("a"))
            .with_slot(SlotSeed::new("b"))
            .with_slot(SlotSeed::new("c"))
            .with_slot(SlotSeed::new("d"));
        let state = CanonicalState::from_contract(&bloated);
        let finding = check_scope_containment(&contract, &state);
        assert_eq!(finding.verdict, Verdict::Fail);
    }

    #[test]
    fn terminal_language_fails_non_final() {
        let text = "The lantern went dark at last.\n\nTHE END\n";
        let finding = check_premature_termination(text, false);
        assert_eq!(finding.verdict, Verdict::Fail);
    }

    #[test]
    fn terminal_language_allowed_on_final() {
        let text = "And so it was over.\n\nThe End.\n";
        let finding = check_premature_termination(text, true);
        assert_eq!(finding.verdict, Verdict::Pass);
    }

    #[test]
    fn mid_sentence_end_is_not_terminal() {
        let text = "She walked toward the end of the pier and waited.";
        let finding = check_premature_termination(text, false);
        assert_eq!(finding.verdict, Verdict::Pass);
    }

    #[test]
    fn size_drift_warns_but_never_fails() {
        assert_eq!(check_size_conformance(2000, 2000).verdict, Verdict::Pass);
        assert_eq!(check_size_conformance(900, 2000).verdict, Verdict::Warn);
        assert_eq!(check_size_conformance(3500, 2000).verdict, Verdict::Warn);
        assert!(!check_size_conformance(900, 2000).critical);
    }

    #[test]
    fn zero_target_skips_size_check() {
        assert_eq!(check_size_conformance(500, 0).verdict, Verdict::Pass);
    }
}
