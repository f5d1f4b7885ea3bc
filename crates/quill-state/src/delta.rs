//! State deltas
//!
//! A delta is a transient, per-increment proposal of state changes derived
//! from increment text. It is a set of named commands, not an object merge:
//! the updater decides what actually applies. Deltas are consumed immediately
//! and never persisted as their own entity.

use crate::slot::SlotId;
use crate::state::{CapabilityValue, IrreversibleValue};
use serde::{Deserialize, Serialize};

/// Proposed capability assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityChange {
    /// Capability name
    pub name: String,
    /// Proposed value
    pub value: CapabilityValue,
}

/// Proposed irreversible flag change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrreversibleChange {
    /// Flag name
    pub name: String,
    /// Proposed value
    pub value: IrreversibleValue,
}

/// Proposed rule text for a slot whose text is not yet established
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactAssignment {
    /// Target slot
    pub slot: SlotId,
    /// Rule text
    pub text: String,
}

/// Proposed state changes for one increment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    /// Slots to mark violated
    #[serde(default)]
    pub violations: Vec<SlotId>,
    /// Capability assignments
    #[serde(default)]
    pub capabilities: Vec<CapabilityChange>,
    /// Irreversible flag changes
    #[serde(default)]
    pub irreversible: Vec<IrreversibleChange>,
    /// Timeline commitments to append
    #[serde(default)]
    pub timeline: Vec<String>,
    /// Rule text assignments
    #[serde(default)]
    pub facts: Vec<FactAssignment>,
}

impl StateDelta {
    /// A delta proposing nothing
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if the delta proposes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
            && self.capabilities.is_empty()
            && self.irreversible.is_empty()
            && self.timeline.is_empty()
            && self.facts.is_empty()
    }

    /// Total number of proposed changes
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.len()
            + self.capabilities.len()
            + self.irreversible.len()
            + self.timeline.len()
            + self.facts.len()
    }

    /// Add a violation proposal
    #[inline]
    #[must_use]
    pub fn with_violation(mut self, slot: impl Into<SlotId>) -> Self {
        self.violations.push(slot.into());
        self
    }

    /// Add a capability proposal
    #[inline]
    #[must_use]
    pub fn with_capability(mut self, name: impl Into<String>, value: CapabilityValue) -> Self {
        self.capabilities.push(CapabilityChange {
            name: name.into(),
            value,
        });
        self
    }

    /// Add an irreversible flag proposal
    #[inline]
    #[must_use]
    pub fn with_irreversible(mut self, name: impl Into<String>, value: IrreversibleValue) -> Self {
        self.irreversible.push(IrreversibleChange {
            name: name.into(),
            value,
        });
        self
    }

    /// Add a timeline commitment
    #[inline]
    #[must_use]
    pub fn with_timeline(mut self, description: impl Into<String>) -> Self {
        self.timeline.push(description.into());
        self
    }

    /// Add a rule text assignment
    #[inline]
    #[must_use]
    pub fn with_fact(mut self, slot: impl Into<SlotId>, text: impl Into<String>) -> Self {
        self.facts.push(FactAssignment {
            slot: slot.into(),
            text: text.into(),
        });
        self
    }
}
