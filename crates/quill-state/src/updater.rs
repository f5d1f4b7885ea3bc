//! State updater
//!
//! Applies a [`StateDelta`] to [`CanonicalState`] incrementally. Bookkeeping
//! and invariant enforcement only; plausibility judgment belongs to the gate.
//!
//! Every proposed change either applies, or is skipped with a recorded
//! reason. A skipped change is never an error for the pipeline: the increment
//! is already durable and generation continues.

use crate::delta::StateDelta;
use crate::slot::SlotId;
use crate::state::{CanonicalState, CapabilityValue};
use serde::{Deserialize, Serialize};

/// Why a proposed change was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Slot id not present in the contract
    UnknownSlot,
    /// Violation count already at the slot's threshold
    AlreadyAtThreshold,
    /// Proposal would decrease a monotonic counter or scalar
    WouldDecrease,
    /// Proposal would revoke an acquired capability
    CapabilityRevocation,
    /// Proposal would restore a lost safety property
    SafetyReacquisition,
    /// Proposal changes the value kind of an existing flag
    KindMismatch,
    /// Slot text is already established
    TextAlreadyEstablished,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownSlot => "unknown_slot",
            Self::AlreadyAtThreshold => "already_at_threshold",
            Self::WouldDecrease => "would_decrease",
            Self::CapabilityRevocation => "capability_revocation",
            Self::SafetyReacquisition => "safety_reacquisition",
            Self::KindMismatch => "kind_mismatch",
            Self::TextAlreadyEstablished => "text_already_established",
        };
        write!(f, "{s}")
    }
}

/// A change that was applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum AppliedChange {
    /// Rule violation recorded
    Violation {
        /// Violated slot
        slot: SlotId,
        /// Count after applying
        count_after: u32,
    },
    /// Capability acquired or raised
    Capability {
        /// Capability name
        name: String,
    },
    /// Irreversible flag moved forward
    Irreversible {
        /// Flag name
        name: String,
    },
    /// Timeline commitment appended
    Timeline {
        /// Committed description
        description: String,
    },
    /// Rule text established
    Fact {
        /// Target slot
        slot: SlotId,
    },
    /// Consequence fired by the rule system
    Consequence {
        /// Slot whose violation fired it
        slot: SlotId,
        /// Consequence tag
        tag: String,
    },
    /// Slot activated through dependency wiring
    SlotActivated {
        /// Activated slot
        slot: SlotId,
    },
}

/// A change that was skipped, with its reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedChange {
    /// Human-readable description of the proposal
    pub description: String,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// Result of applying one delta
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// Changes applied, in application order
    pub applied: Vec<AppliedChange>,
    /// Changes skipped, each with a reason
    pub skipped: Vec<SkippedChange>,
    /// Malformed proposals that could not be interpreted at all
    pub errors: Vec<String>,
}

impl UpdateOutcome {
    /// True if nothing was applied
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }

    fn skip(&mut self, description: impl Into<String>, reason: SkipReason) {
        let description = description.into();
        tracing::warn!(%reason, proposal = %description, "skipping state change");
        self.skipped.push(SkippedChange {
            description,
            reason,
        });
    }
}

/// Applies deltas to canonical state
///
/// Stateless; all session state lives in [`CanonicalState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StateUpdater;

impl StateUpdater {
    /// Create an updater
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Apply a delta for the given increment
    ///
    /// Never fails: individual proposals that would break an invariant are
    /// skipped and logged. Consequences fire through the same monotonic
    /// mutators as extractor proposals, never by direct flag writes.
    pub fn apply(
        &self,
        state: &mut CanonicalState,
        delta: &StateDelta,
        increment: u64,
    ) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();

        for slot_id in &delta.violations {
            self.apply_violation(state, slot_id, increment, &mut outcome);
        }

        for change in &delta.capabilities {
            match state.acquire_capability(&change.name, change.value) {
                Ok(true) => outcome.applied.push(AppliedChange::Capability {
                    name: change.name.clone(),
                }),
                Ok(false) => {}
                Err(reason) => outcome.skip(format!("capability {}", change.name), reason),
            }
        }

        for change in &delta.irreversible {
            match state.raise_irreversible(&change.name, change.value) {
                Ok(true) => outcome.applied.push(AppliedChange::Irreversible {
                    name: change.name.clone(),
                }),
                Ok(false) => {}
                Err(reason) => outcome.skip(format!("irreversible {}", change.name), reason),
            }
        }

        for description in &delta.timeline {
            state.push_timeline(description.clone(), increment);
            outcome.applied.push(AppliedChange::Timeline {
                description: description.clone(),
            });
        }

        for fact in &delta.facts {
            match state.slot_mut(&fact.slot) {
                None => outcome.skip(format!("fact for {}", fact.slot), SkipReason::UnknownSlot),
                Some(slot) if slot.text.is_some() => outcome.skip(
                    format!("fact for {}", fact.slot),
                    SkipReason::TextAlreadyEstablished,
                ),
                Some(slot) => {
                    slot.text = Some(fact.text.clone());
                    outcome.applied.push(AppliedChange::Fact {
                        slot: fact.slot.clone(),
                    });
                }
            }
        }

        self.activate_dependents(state, &mut outcome);

        tracing::debug!(
            increment,
            applied = outcome.applied.len(),
            skipped = outcome.skipped.len(),
            "delta applied"
        );
        outcome
    }

    fn apply_violation(
        &self,
        state: &mut CanonicalState,
        slot_id: &SlotId,
        increment: u64,
        outcome: &mut UpdateOutcome,
    ) {
        let (first_violation, crossed_threshold, count_after) = {
            let Some(slot) = state.slot_mut(slot_id) else {
                outcome.skip(format!("violation of {slot_id}"), SkipReason::UnknownSlot);
                return;
            };
            if slot.at_threshold() {
                outcome.skip(
                    format!("violation of {slot_id}"),
                    SkipReason::AlreadyAtThreshold,
                );
                return;
            }
            let first = !slot.violated;
            slot.violated = true;
            slot.violation_count += 1;
            let crossed = slot.at_threshold();
            (first, crossed, slot.violation_count)
        };

        state.log_violation(slot_id.clone(), increment, count_after);
        outcome.applied.push(AppliedChange::Violation {
            slot: slot_id.clone(),
            count_after,
        });

        let (consequences, enables) = {
            let slot = state.slot(slot_id).cloned();
            match slot {
                Some(s) => (s.consequences, s.dependencies.enables),
                None => return,
            }
        };

        // Consequences are a function of the rule system, applied through the
        // same monotonic mutators as any other change.
        if first_violation {
            for tag in &consequences.immediate {
                if state
                    .acquire_capability(tag, CapabilityValue::Bool(true))
                    .unwrap_or(false)
                {
                    outcome.applied.push(AppliedChange::Consequence {
                        slot: slot_id.clone(),
                        tag: tag.clone(),
                    });
                }
            }
            for enabled in &enables {
                self.activate_slot(state, enabled, outcome);
            }
        }

        if crossed_threshold {
            for tag in &consequences.delayed {
                if state
                    .acquire_capability(tag, CapabilityValue::Bool(true))
                    .unwrap_or(false)
                {
                    outcome.applied.push(AppliedChange::Consequence {
                        slot: slot_id.clone(),
                        tag: tag.clone(),
                    });
                }
            }
            for tag in &consequences.permanent {
                state.bump_counter(tag);
                outcome.applied.push(AppliedChange::Consequence {
                    slot: slot_id.clone(),
                    tag: tag.clone(),
                });
            }
        }
    }

    fn activate_slot(
        &self,
        state: &mut CanonicalState,
        slot_id: &SlotId,
        outcome: &mut UpdateOutcome,
    ) {
        let conflicted = {
            let Some(slot) = state.slot(slot_id) else {
                return;
            };
            if slot.active {
                return;
            }
            slot.dependencies
                .conflicts
                .iter()
                .any(|c| state.slot(c).is_some_and(|s| s.active))
        };
        if conflicted {
            return;
        }
        if let Some(slot) = state.slot_mut(slot_id) {
            slot.active = true;
            outcome.applied.push(AppliedChange::SlotActivated {
                slot: slot_id.clone(),
            });
        }
    }

    /// Activate inactive slots whose `requires` are all satisfied
    ///
    /// A requirement is satisfied once the required slot has been violated.
    fn activate_dependents(&self, state: &mut CanonicalState, outcome: &mut UpdateOutcome) {
        let candidates: Vec<SlotId> = state
            .slots
            .values()
            .filter(|slot| !slot.active && !slot.dependencies.requires.is_empty())
            .filter(|slot| {
                slot.dependencies
                    .requires
                    .iter()
                    .all(|req| state.slot(req).is_some_and(|s| s.violated))
            })
            .map(|slot| slot.id.clone())
            .collect();

        for id in candidates {
            self.activate_slot(state, &id, outcome);
        }
    }
}
