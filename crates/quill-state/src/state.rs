//! Canonical state
//!
//! Authoritative record of derived facts about the artifact-so-far. The prose
//! lives in the increment store; everything that must hold across future
//! increments lives here. Counters and flags are one-directional for the life
//! of a session, and the mutators in this module are the only place that
//! direction is enforced.

use crate::contract::Contract;
use crate::slot::{RuleSlot, SlotId};
use crate::updater::SkipReason;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Current serialization version for the state file
pub const STATE_FILE_VERSION: u32 = 1;

/// A capability value: boolean acquisition or a scalar level
///
/// Booleans never revert to false once true; scalars never decrease.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CapabilityValue {
    /// Acquired / not acquired
    Bool(bool),
    /// Monotonically non-decreasing level
    Scalar(i64),
}

/// An irreversible flag value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IrreversibleValue {
    /// Monotonically non-decreasing counter, e.g. a contamination level
    Counter(u64),
    /// Safety/normalcy property; may only transition true -> false
    Safety(bool),
}

/// One asserted past event, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    /// What is asserted to have happened
    pub description: String,
    /// Increment that introduced the commitment
    pub increment: u64,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

/// One applied rule violation, append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationRecord {
    /// Violated slot
    pub slot: SlotId,
    /// Increment that carried the violation
    pub increment: u64,
    /// Violation count after applying
    pub count_after: u32,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Canonical state for one session
///
/// Owned exclusively by the session's stage controller; mutated only through
/// [`crate::StateUpdater::apply`]. Serializes verbatim to the state file,
/// with camelCase keys throughout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalState {
    /// State file format version
    pub version: u32,
    /// Rule slots, insertion-ordered
    pub slots: IndexMap<SlotId, RuleSlot>,
    /// Capability flags, monotonically acquired
    pub capabilities: IndexMap<String, CapabilityValue>,
    /// Irreversible flags and counters
    pub irreversible: IndexMap<String, IrreversibleValue>,
    /// Timeline commitments, append-only
    pub timeline: Vec<TimelineEvent>,
    /// Applied violations, append-only
    pub violation_log: Vec<ViolationRecord>,
}

impl CanonicalState {
    /// Build initial state from the session contract
    #[must_use]
    pub fn from_contract(contract: &Contract) -> Self {
        let slots = contract
            .slots
            .iter()
            .cloned()
            .map(|seed| (seed.id.clone(), seed.into_slot()))
            .collect();

        Self {
            version: STATE_FILE_VERSION,
            slots,
            capabilities: contract.initial_capabilities.clone(),
            irreversible: contract.initial_irreversible.clone(),
            timeline: Vec::new(),
            violation_log: Vec::new(),
        }
    }

    /// Look up a slot
    #[inline]
    #[must_use]
    pub fn slot(&self, id: &SlotId) -> Option<&RuleSlot> {
        self.slots.get(id)
    }

    pub(crate) fn slot_mut(&mut self, id: &SlotId) -> Option<&mut RuleSlot> {
        self.slots.get_mut(id)
    }

    /// Slots currently active, in contract order
    #[must_use]
    pub fn active_slots(&self) -> Vec<&RuleSlot> {
        self.slots.values().filter(|s| s.active).collect()
    }

    /// Number of slots in the collection
    #[inline]
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// All tracked escalation counters, for monotonicity checks
    ///
    /// Covers per-slot violation counts and irreversible counters under
    /// stable names (`slot:<id>`, `irreversible:<name>`).
    #[must_use]
    pub fn counters(&self) -> IndexMap<String, u64> {
        let mut out = IndexMap::new();
        for (id, slot) in &self.slots {
            out.insert(format!("slot:{id}"), u64::from(slot.violation_count));
        }
        for (name, value) in &self.irreversible {
            if let IrreversibleValue::Counter(n) = value {
                out.insert(format!("irreversible:{name}"), *n);
            }
        }
        out
    }

    /// Capability flags currently acquired (booleans that are true)
    #[must_use]
    pub fn acquired_capabilities(&self) -> Vec<&str> {
        self.capabilities
            .iter()
            .filter(|(_, v)| matches!(v, CapabilityValue::Bool(true)))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Set or raise a capability, enforcing monotonicity
    ///
    /// Returns `Ok(true)` if the value changed, `Ok(false)` for a no-op, and
    /// the skip reason if the proposal moves backward.
    pub(crate) fn acquire_capability(
        &mut self,
        name: &str,
        value: CapabilityValue,
    ) -> Result<bool, SkipReason> {
        match (self.capabilities.get(name), value) {
            (None, v) => {
                self.capabilities.insert(name.to_string(), v);
                Ok(true)
            }
            (Some(CapabilityValue::Bool(true)), CapabilityValue::Bool(false)) => {
                Err(SkipReason::CapabilityRevocation)
            }
            (Some(CapabilityValue::Bool(current)), CapabilityValue::Bool(proposed)) => {
                let changed = proposed && !current;
                if changed {
                    self.capabilities
                        .insert(name.to_string(), CapabilityValue::Bool(true));
                }
                Ok(changed)
            }
            (Some(CapabilityValue::Scalar(current)), CapabilityValue::Scalar(proposed)) => {
                if proposed < *current {
                    return Err(SkipReason::WouldDecrease);
                }
                let changed = proposed > *current;
                if changed {
                    self.capabilities
                        .insert(name.to_string(), CapabilityValue::Scalar(proposed));
                }
                Ok(changed)
            }
            // Kind change is neither an acquisition nor a revocation we can
            // order; reject it.
            (Some(_), _) => Err(SkipReason::KindMismatch),
        }
    }

    /// Set or raise an irreversible flag, enforcing one-directionality
    pub(crate) fn raise_irreversible(
        &mut self,
        name: &str,
        value: IrreversibleValue,
    ) -> Result<bool, SkipReason> {
        match (self.irreversible.get(name), value) {
            (None, v) => {
                self.irreversible.insert(name.to_string(), v);
                Ok(true)
            }
            (Some(IrreversibleValue::Counter(current)), IrreversibleValue::Counter(proposed)) => {
                if proposed < *current {
                    return Err(SkipReason::WouldDecrease);
                }
                let changed = proposed > *current;
                if changed {
                    self.irreversible
                        .insert(name.to_string(), IrreversibleValue::Counter(proposed));
                }
                Ok(changed)
            }
            (Some(IrreversibleValue::Safety(false)), IrreversibleValue::Safety(true)) => {
                Err(SkipReason::SafetyReacquisition)
            }
            (Some(IrreversibleValue::Safety(current)), IrreversibleValue::Safety(proposed)) => {
                let changed = *current && !proposed;
                if changed {
                    self.irreversible
                        .insert(name.to_string(), IrreversibleValue::Safety(false));
                }
                Ok(changed)
            }
            (Some(_), _) => Err(SkipReason::KindMismatch),
        }
    }

    /// Bump a named irreversible counter by one, creating it at 1 if absent
    pub(crate) fn bump_counter(&mut self, name: &str) {
        let next = match self.irreversible.get(name) {
            Some(IrreversibleValue::Counter(n)) => n + 1,
            _ => 1,
        };
        self.irreversible
            .insert(name.to_string(), IrreversibleValue::Counter(next));
    }

    pub(crate) fn push_timeline(&mut self, description: String, increment: u64) {
        self.timeline.push(TimelineEvent {
            description,
            increment,
            recorded_at: Utc::now(),
        });
    }

    pub(crate) fn log_violation(&mut self, slot: SlotId, increment: u64, count_after: u32) {
        self.violation_log.push(ViolationRecord {
            slot,
            increment,
            count_after,
            recorded_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SlotSeed;
    use pretty_assertions::assert_eq;

    fn state_with_slot() -> CanonicalState {
        let contract = Contract::new(4)
            .with_slot(SlotSeed::new("r1").with_threshold(2))
            .with_irreversible("contamination", IrreversibleValue::Counter(0))
            .with_irreversible("daylight_safe", IrreversibleValue::Safety(true));
        CanonicalState::from_contract(&contract)
    }

    #[test]
    fn from_contract_seeds_slots_and_flags() {
        let state = state_with_slot();
        assert_eq!(state.slot_count(), 1);
        assert_eq!(
            state.irreversible.get("contamination"),
            Some(&IrreversibleValue::Counter(0))
        );
        assert!(state.timeline.is_empty());
    }

    #[test]
    fn capability_cannot_be_revoked() {
        let mut state = state_with_slot();
        state
            .acquire_capability("sees_in_dark", CapabilityValue::Bool(true))
            .unwrap();
        let err = state
            .acquire_capability("sees_in_dark", CapabilityValue::Bool(false))
            .unwrap_err();
        assert_eq!(err, SkipReason::CapabilityRevocation);
        assert_eq!(
            state.capabilities.get("sees_in_dark"),
            Some(&CapabilityValue::Bool(true))
        );
    }

    #[test]
    fn scalar_capability_never_decreases() {
        let mut state = state_with_slot();
        state
            .acquire_capability("hunger", CapabilityValue::Scalar(3))
            .unwrap();
        let err = state
            .acquire_capability("hunger", CapabilityValue::Scalar(1))
            .unwrap_err();
        assert_eq!(err, SkipReason::WouldDecrease);
    }

    #[test]
    fn irreversible_counter_never_decreases() {
        let mut state = state_with_slot();
        state
            .raise_irreversible("contamination", IrreversibleValue::Counter(2))
            .unwrap();
        let err = state
            .raise_irreversible("contamination", IrreversibleValue::Counter(1))
            .unwrap_err();
        assert_eq!(err, SkipReason::WouldDecrease);
    }

    #[test]
    fn safety_flag_only_falls() {
        let mut state = state_with_slot();
        assert!(state
            .raise_irreversible("daylight_safe", IrreversibleValue::Safety(false))
            .unwrap());
        let err = state
            .raise_irreversible("daylight_safe", IrreversibleValue::Safety(true))
            .unwrap_err();
        assert_eq!(err, SkipReason::SafetyReacquisition);
    }

    #[test]
    fn counters_cover_slots_and_irreversible() {
        let state = state_with_slot();
        let counters = state.counters();
        assert_eq!(counters.get("slot:r1"), Some(&0));
        assert_eq!(counters.get("irreversible:contamination"), Some(&0));
        // Safety booleans are not counters.
        assert!(!counters.contains_key("irreversible:daylight_safe"));
    }

    #[test]
    fn state_file_round_trip() {
        let mut state = state_with_slot();
        state.push_timeline("the well ran dry".to_string(), 1);
        state.bump_counter("contamination");

        let json = serde_json::to_string_pretty(&state).unwrap();
        let back: CanonicalState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
        assert_eq!(back.version, STATE_FILE_VERSION);
    }

    #[test]
    fn state_file_field_names() {
        let mut state = state_with_slot();
        state.push_timeline("the well ran dry".to_string(), 1);
        state.log_violation(SlotId::new("r1"), 1, 1);

        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("violationLog").is_some());
        assert!(json["slots"]["r1"].get("violationCount").is_some());
        assert!(json["timeline"][0].get("recordedAt").is_some());
        assert!(json["violationLog"][0].get("countAfter").is_some());
    }
}
