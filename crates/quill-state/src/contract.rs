//! Session contract
//!
//! The structured, immutable portion of a session's parameters that seeds
//! canonical state and bounds the rule system for the session's lifetime.

use crate::slot::{Consequences, Dependencies, RuleSlot, SlotId};
use crate::state::{CapabilityValue, IrreversibleValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Seed definition for one rule slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSeed {
    /// Slot identifier
    pub id: SlotId,
    /// Initial rule text, if already established
    #[serde(default)]
    pub text: Option<String>,
    /// Whether the slot starts active
    #[serde(default = "default_active")]
    pub active: bool,
    /// Violations at which consequences fire
    #[serde(default = "default_threshold")]
    pub violation_threshold: u32,
    /// Consequence tags
    #[serde(default)]
    pub consequences: Consequences,
    /// Dependency wiring
    #[serde(default)]
    pub dependencies: Dependencies,
}

fn default_active() -> bool {
    true
}

fn default_threshold() -> u32 {
    1
}

impl SlotSeed {
    /// Create an active seed with threshold 1
    #[must_use]
    pub fn new(id: impl Into<SlotId>) -> Self {
        Self {
            id: id.into(),
            text: None,
            active: true,
            violation_threshold: 1,
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

    /// With threshold
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.violation_threshold = threshold.max(1);
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

    pub(crate) fn into_slot(self) -> RuleSlot {
        RuleSlot {
            id: self.id,
            text: self.text,
            active: self.active,
            violated: false,
            violation_count: 0,
            violation_threshold: self.violation_threshold.max(1),
            consequences: self.consequences,
            dependencies: self.dependencies,
        }
    }
}

/// Immutable session contract
///
/// Fixed at session creation; the gate validator rejects any state that grows
/// past `max_rule_slots`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Hard cap on the number of rule slots
    pub max_rule_slots: usize,
    /// Seed slots
    pub slots: Vec<SlotSeed>,
    /// Capabilities present from the start
    #[serde(default)]
    pub initial_capabilities: IndexMap<String, CapabilityValue>,
    /// Irreversible flags present from the start
    #[serde(default)]
    pub initial_irreversible: IndexMap<String, IrreversibleValue>,
}

impl Contract {
    /// Create a contract with a slot cap and no seeds
    #[must_use]
    pub fn new(max_rule_slots: usize) -> Self {
        Self {
            max_rule_slots,
            slots: Vec::new(),
            initial_capabilities: IndexMap::new(),
            initial_irreversible: IndexMap::new(),
        }
    }

    /// Add a seed slot
    #[inline]
    #[must_use]
    pub fn with_slot(mut self, seed: SlotSeed) -> Self {
        self.slots.push(seed);
        self
    }

    /// Add an initial irreversible flag
    #[inline]
    #[must_use]
    pub fn with_irreversible(mut self, name: impl Into<String>, value: IrreversibleValue) -> Self {
        self.initial_irreversible.insert(name.into(), value);
        self
    }

    /// Add an initial capability
    #[inline]
    #[must_use]
    pub fn with_capability(mut self, name: impl Into<String>, value: CapabilityValue) -> Self {
        self.initial_capabilities.insert(name.into(), value);
        self
    }

    /// Validate internal consistency
    ///
    /// # Errors
    /// Returns an error for duplicate slot ids, seed counts past the cap, or
    /// dependency references to slots the contract does not declare.
    pub fn validate(&self) -> Result<(), crate::error::StateError> {
        use crate::error::StateError;

        if self.slots.len() > self.max_rule_slots {
            return Err(StateError::SlotCountExceedsContract {
                count: self.slots.len(),
                max: self.max_rule_slots,
            });
        }

        let mut seen = std::collections::HashSet::new();
        for seed in &self.slots {
            if !seen.insert(&seed.id) {
                return Err(StateError::DuplicateSlot(seed.id.clone()));
            }
        }

        for seed in &self.slots {
            let deps = &seed.dependencies;
            for referenced in deps
                .requires
                .iter()
                .chain(&deps.enables)
                .chain(&deps.conflicts)
            {
                if !seen.contains(referenced) {
                    return Err(StateError::UnknownDependency {
                        slot: seed.id.clone(),
                        missing: referenced.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_builder() {
        let contract = Contract::new(12)
            .with_slot(SlotSeed::new("r1").with_threshold(2))
            .with_irreversible("contamination", IrreversibleValue::Counter(0));

        assert_eq!(contract.max_rule_slots, 12);
        assert_eq!(contract.slots.len(), 1);
        assert_eq!(contract.slots[0].violation_threshold, 2);
    }

    #[test]
    fn contract_validate_rejects_duplicates() {
        let contract = Contract::new(4)
            .with_slot(SlotSeed::new("r1"))
            .with_slot(SlotSeed::new("r1"));
        assert!(contract.validate().is_err());
    }

    #[test]
    fn contract_validate_rejects_overflow() {
        let contract = Contract::new(1)
            .with_slot(SlotSeed::new("r1"))
            .with_slot(SlotSeed::new("r2"));
        assert!(contract.validate().is_err());
    }

    #[test]
    fn contract_validate_rejects_dangling_dependency() {
        let contract = Contract::new(4).with_slot(SlotSeed::new("r1").with_dependencies(
            crate::slot::Dependencies {
                requires: vec![crate::slot::SlotId::new("ghost")],
                enables: vec![],
                conflicts: vec![],
            },
        ));
        assert!(contract.validate().is_err());
    }

    #[test]
    fn seed_defaults_from_json() {
        let seed: SlotSeed = serde_json::from_str(r#"{"id":"r9"}"#).unwrap();
        assert!(seed.active);
        assert_eq!(seed.violation_threshold, 1);
        assert!(seed.consequences.is_empty());
    }
}
