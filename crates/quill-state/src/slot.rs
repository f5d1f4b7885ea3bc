//! Rule slots
//!
//! A slot tracks one rule or established fact about the artifact. Slots are
//! fixed at session init from the contract; their text may be established
//! later, but the collection itself never grows past the contracted count.

use serde::{Deserialize, Serialize};

/// Identifier of a rule slot within the contract
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(String);

impl SlotId {
    /// Create a slot id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// String form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SlotId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Consequence tags attached to a slot
///
/// Tags name flags in canonical state. Immediate tags fire when the slot is
/// first marked violated; delayed and permanent tags fire when the violation
/// count reaches the slot's threshold. Permanent tags target irreversible
/// counters, the others target capability flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consequences {
    /// Fire on first violation
    #[serde(default)]
    pub immediate: Vec<String>,
    /// Fire when threshold is reached
    #[serde(default)]
    pub delayed: Vec<String>,
    /// Fire when threshold is reached; target irreversible counters
    #[serde(default)]
    pub permanent: Vec<String>,
}

impl Consequences {
    /// No consequences
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// True if no tags are present
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty() && self.delayed.is_empty() && self.permanent.is_empty()
    }
}

/// Dependency references between slots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Slots that must be violated before this slot activates
    #[serde(default)]
    pub requires: Vec<SlotId>,
    /// Slots activated when this slot is violated
    #[serde(default)]
    pub enables: Vec<SlotId>,
    /// Slots that block activation while active
    #[serde(default)]
    pub conflicts: Vec<SlotId>,
}

impl Dependencies {
    /// No dependencies
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// One rule slot
///
/// Serializes with camelCase keys (`violationCount`, `violationThreshold`)
/// into the state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSlot {
    /// Slot identifier
    pub id: SlotId,
    /// Rule text, null until established
    pub text: Option<String>,
    /// Whether the slot participates in constraint injection and gating
    pub active: bool,
    /// Whether the rule has been violated at least once
    pub violated: bool,
    /// Number of recorded violations, monotonically non-decreasing
    pub violation_count: u32,
    /// Violations at which consequences fire; at least 1
    pub violation_threshold: u32,
    /// Consequence tags
    #[serde(default)]
    pub consequences: Consequences,
    /// Dependency wiring
    #[serde(default)]
    pub dependencies: Dependencies,
}

impl RuleSlot {
    /// Create an active slot with the given threshold
    #[must_use]
    pub fn new(id: impl Into<SlotId>, violation_threshold: u32) -> Self {
        Self {
            id: id.into(),
            text: None,
            active: true,
            violated: false,
            violation_count: 0,
            violation_threshold: violation_threshold.max(1),
            consequences: Consequences::none(),
            dependencies: Dependencies::none(),
        }
    }

    /// With rule text
    #[inline]
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// With activation state
    #[inline]
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// With consequences
    #[inline]
    #[must_use]
    pub fn with_consequences(mut self, consequences: Consequences) -> Self {
        self.consequences = consequences;
        self
    }

    /// With dependencies
    #[inline]
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Dependencies) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Whether the violation count has reached the threshold
    #[inline]
    #[must_use]
    pub fn at_threshold(&self) -> bool {
        self.violation_count >= self.violation_threshold
    }
}

impl From<String> for SlotId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_threshold_floor() {
        let slot = RuleSlot::new("r1", 0);
        assert_eq!(slot.violation_threshold, 1);
    }

    #[test]
    fn slot_builder() {
        let slot = RuleSlot::new("r2", 2)
            .with_text("no daylight after chapter one")
            .with_active(false);

        assert_eq!(slot.id.as_str(), "r2");
        assert!(!slot.active);
        assert!(!slot.violated);
        assert!(slot.text.is_some());
    }

    #[test]
    fn slot_at_threshold() {
        let mut slot = RuleSlot::new("r3", 2);
        assert!(!slot.at_threshold());
        slot.violation_count = 2;
        assert!(slot.at_threshold());
    }

    #[test]
    fn slot_json_field_names() {
        let slot = RuleSlot::new("r5", 2);
        let json = serde_json::to_value(&slot).unwrap();
        assert!(json.get("violationCount").is_some());
        assert!(json.get("violationThreshold").is_some());
        assert!(json.get("violation_count").is_none());
    }

    #[test]
    fn slot_serde_round_trip() {
        let slot = RuleSlot::new("r4", 1).with_consequences(Consequences {
            immediate: vec!["warned".to_string()],
            delayed: vec![],
            permanent: vec!["contamination".to_string()],
        });

        let json = serde_json::to_string(&slot).unwrap();
        let back: RuleSlot = serde_json::from_str(&json).unwrap();
        assert_eq!(slot, back);
    }
}
