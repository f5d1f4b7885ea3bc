//! Heuristic fallback parse
//!
//! Pattern matches against surface text are heuristic signals, not proofs.
//! The fallback can only propose changes for the updater to vet; it never
//! touches state itself, and the updater's skip rules bound the damage of a
//! false positive.

use once_cell::sync::Lazy;
use quill_state::{CapabilityValue, SlotId, StateDelta};
use regex::Regex;

static CAPABILITY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:-\s*)?capability[:\s]+([a-z0-9_]+)\s*(?:=\s*true)?\s*$")
        .unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

static TIMELINE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:-\s*)?timeline[:\s]+(.+?)\s*$")
        .unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Recover partial signal from unparseable extractor output
///
/// Looks for slot ids mentioned near violation language, plus `capability:`
/// and `timeline:` marker lines the strict prompt asks for as a backup
/// format. Unknown-slot proposals are harmless; the updater skips them.
#[must_use]
pub fn heuristic_parse(raw: &str, known_slots: &[SlotId]) -> StateDelta {
    let mut delta = StateDelta::empty();

    for slot in known_slots {
        let escaped = regex::escape(slot.as_str());
        let pattern = format!(r#"(?i)(?:violat\w*.{{1,40}}["'`]?{escaped}\b|["'`]?{escaped}["'`]?.{{1,40}}violat\w*)"#);
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if re.is_match(raw) {
            delta.violations.push(slot.clone());
        }
    }

    for capture in CAPABILITY_LINE.captures_iter(raw) {
        if let Some(name) = capture.get(1) {
            delta = delta.with_capability(name.as_str(), CapabilityValue::Bool(true));
        }
    }

    for capture in TIMELINE_LINE.captures_iter(raw) {
        if let Some(event) = capture.get(1) {
            delta = delta.with_timeline(event.as_str());
        }
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(ids: &[&str]) -> Vec<SlotId> {
        ids.iter().map(|s| SlotId::new(*s)).collect()
    }

    #[test]
    fn finds_violation_near_slot_id() {
        let raw = "The chunk clearly violates \"rule_mirrors\" in the second scene.";
        let delta = heuristic_parse(raw, &slots(&["rule_mirrors", "rule_daylight"]));
        assert_eq!(delta.violations.len(), 1);
        assert_eq!(delta.violations[0].as_str(), "rule_mirrors");
    }

    #[test]
    fn finds_reversed_order_mention() {
        let raw = "rule_daylight is violated when the narrator steps outside at noon.";
        let delta = heuristic_parse(raw, &slots(&["rule_daylight"]));
        assert_eq!(delta.violations.len(), 1);
    }

    #[test]
    fn parses_marker_lines() {
        let raw = "garbage { not json\ncapability: sees_in_dark\ntimeline: the door was sealed shut\n";
        let delta = heuristic_parse(raw, &slots(&[]));
        assert_eq!(delta.capabilities.len(), 1);
        assert_eq!(delta.timeline, vec!["the door was sealed shut".to_string()]);
    }

    #[test]
    fn unrelated_text_yields_empty_delta() {
        let raw = "Nothing notable happened in this chunk.";
        let delta = heuristic_parse(raw, &slots(&["rule_mirrors"]));
        assert!(delta.is_empty());
    }
}
