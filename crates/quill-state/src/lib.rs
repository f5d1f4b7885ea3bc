//! Canonical state for chunked generation sessions
//!
//! The single source of truth for derived facts about the artifact-so-far:
//! - Rule slots with violation counters and consequence wiring
//! - Capability flags (monotonically acquired)
//! - Irreversible flags and counters (one-directional)
//! - Append-only timeline commitments
//!
//! All mutation goes through [`StateUpdater::apply`], which enforces the
//! monotonic invariants instead of merely checking them after the fact.

pub mod contract;
pub mod delta;
pub mod error;
pub mod slot;
pub mod state;
pub mod updater;

pub use contract::{Contract, SlotSeed};
pub use delta::{CapabilityChange, FactAssignment, IrreversibleChange, StateDelta};
pub use error::StateError;
pub use slot::{Consequences, Dependencies, RuleSlot, SlotId};
pub use state::{
    CanonicalState, CapabilityValue, IrreversibleValue, TimelineEvent, ViolationRecord,
};
pub use updater::{AppliedChange, SkipReason, SkippedChange, StateUpdater, UpdateOutcome};
