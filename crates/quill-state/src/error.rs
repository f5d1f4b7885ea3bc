//! Error types for canonical state

use crate::slot::SlotId;

/// State-layer errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Contract declares the same slot id twice
    #[error("duplicate slot id in contract: {0}")]
    DuplicateSlot(SlotId),

    /// Contract seeds more slots than its own cap
    #[error("contract seeds {count} slots but caps the collection at {max}")]
    SlotCountExceedsContract {
        /// Seeded slot count
        count: usize,
        /// Contracted maximum
        max: usize,
    },

    /// Dependency references a slot id absent from the contract
    #[error("slot {slot} depends on unknown slot {missing}")]
    UnknownDependency {
        /// Slot declaring the dependency
        slot: SlotId,
        /// Missing reference
        missing: SlotId,
    },

    /// State file could not be (de)serialized
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
