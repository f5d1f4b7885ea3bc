//! Stage controller and increment loop for chunked long-form generation
//!
//! Orchestrates one session at a time: bounded increments from a generation
//! oracle, durable persistence after every increment, advisory delta
//! extraction into canonical state, a gate verdict before the next increment,
//! then assembly, optional whole-artifact passes, and packaging. Every exit
//! path leaves the session directory loadable.

pub mod assembler;
pub mod controller;
pub mod error;
pub mod events;
pub mod generator;
pub mod registry;
pub mod types;

pub use assembler::{ArtifactPass, Assembler, PassReport, INCREMENT_JOIN};
pub use controller::{CancelHandle, PipelineOutcome, StageController};
pub use error::PipelineError;
pub use events::{HeartbeatGuard, HeartbeatStatus, ProgressChannel, ProgressEvent, ProgressKind};
pub use generator::{GeneratedIncrement, IncrementGenerator, IncrementRequest};
pub use registry::SessionRegistry;
pub use types::{Session, SessionConfig, SessionId, Stage};
