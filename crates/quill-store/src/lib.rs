//! Durable increment store
//!
//! The only component that touches the filesystem. Every write follows the
//! same discipline: serialize to a temporary file in the session directory,
//! then rename into place, so a concurrent reader or a crash never observes a
//! partially-written artifact. Loading tolerates a partially-written session
//! and returns whatever is fully persisted.

pub mod error;
pub mod increment;
pub mod manifest;
pub mod report;
pub mod store;

pub use error::StoreError;
pub use increment::{IncrementFile, INCREMENT_HEADER_SEPARATOR};
pub use manifest::{Manifest, ManifestEntry, MANIFEST_VERSION};
pub use report::FailureReport;
pub use store::{IncrementStore, PersistedIncrement};
