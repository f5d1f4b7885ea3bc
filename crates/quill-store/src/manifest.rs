//! Session manifest
//!
//! Ordered index over all increments of a session. Rewritten whole after
//! every successful persist, with the same atomic discipline as increments.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// One manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// 1-indexed sequence number
    pub number: u64,
    /// Increment filename within the session directory
    pub filename: String,
    /// Size in words
    pub size: u64,
    /// Persist timestamp
    pub saved_at: DateTime<Utc>,
    /// blake3 hex digest of the increment text
    pub checksum: String,
}

/// The manifest file
///
/// Serialized with camelCase keys; the on-disk format is
/// `{ version, sessionId, totalIncrements, totalSize, generatedAt, entries }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Format version
    pub version: u32,
    /// Owning session
    pub session_id: String,
    /// Number of increments; always `entries.len()`
    pub total_increments: u64,
    /// Sum of entry sizes
    pub total_size: u64,
    /// When this manifest revision was written
    pub generated_at: DateTime<Utc>,
    /// Entries sorted by sequence number, gapless
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Empty manifest for a new session
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            session_id: session_id.into(),
            total_increments: 0,
            total_size: 0,
            generated_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Append an entry and recompute aggregates
    ///
    /// # Errors
    /// Rejects an entry whose sequence number is not exactly the next one.
    pub fn append(&mut self, entry: ManifestEntry) -> Result<(), StoreError> {
        let expected = self.total_increments + 1;
        if entry.number != expected {
            return Err(StoreError::ManifestInvalid(format!(
                "entry {} appended where {} was expected",
                entry.number, expected
            )));
        }
        self.total_size += entry.size;
        self.total_increments += 1;
        self.generated_at = Utc::now();
        self.entries.push(entry);
        Ok(())
    }

    /// Check the manifest's own invariants
    ///
    /// # Errors
    /// Returns `ManifestInvalid` when entries are unsorted, gapped,
    /// duplicated, or the aggregates disagree with the entries.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.total_increments != self.entries.len() as u64 {
            return Err(StoreError::ManifestInvalid(format!(
                "total_increments {} != entry count {}",
                self.total_increments,
                self.entries.len()
            )));
        }
        for (i, entry) in self.entries.iter().enumerate() {
            let expected = i as u64 + 1;
            if entry.number != expected {
                return Err(StoreError::ManifestInvalid(format!(
                    "entry at position {i} has number {}, expected {expected}",
                    entry.number
                )));
            }
        }
        let sum: u64 = self.entries.iter().map(|e| e.size).sum();
        if sum != self.total_size {
            return Err(StoreError::ManifestInvalid(format!(
                "total_size {} != sum of entry sizes {sum}",
                self.total_size
            )));
        }
        Ok(())
    }

    /// Sequence number the next increment should carry
    #[inline]
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.total_increments + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(number: u64, size: u64) -> ManifestEntry {
        ManifestEntry {
            number,
            filename: format!("increment_{number:04}.txt"),
            size,
            saved_at: Utc::now(),
            checksum: "0".repeat(64),
        }
    }

    #[test]
    fn append_maintains_aggregates() {
        let mut manifest = Manifest::new("sess-1");
        manifest.append(entry(1, 2000)).unwrap();
        manifest.append(entry(2, 1900)).unwrap();

        assert_eq!(manifest.total_increments, 2);
        assert_eq!(manifest.total_size, 3900);
        assert_eq!(manifest.next_sequence(), 3);
        manifest.validate().unwrap();
    }

    #[test]
    fn append_rejects_gaps() {
        let mut manifest = Manifest::new("sess-1");
        manifest.append(entry(1, 100)).unwrap();
        assert!(manifest.append(entry(3, 100)).is_err());
    }

    #[test]
    fn append_rejects_duplicates() {
        let mut manifest = Manifest::new("sess-1");
        manifest.append(entry(1, 100)).unwrap();
        assert!(manifest.append(entry(1, 100)).is_err());
    }

    #[test]
    fn validate_catches_bad_aggregates() {
        let mut manifest = Manifest::new("sess-1");
        manifest.append(entry(1, 100)).unwrap();
        manifest.total_size = 999;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn manifest_json_field_names() {
        let mut manifest = Manifest::new("sess-1");
        manifest.append(entry(1, 100)).unwrap();

        let json = serde_json::to_value(&manifest).unwrap();
        assert!(json.get("sessionId").is_some());
        assert!(json.get("totalIncrements").is_some());
        assert!(json.get("totalSize").is_some());
        assert!(json.get("generatedAt").is_some());
        let first = &json["entries"][0];
        assert!(first.get("number").is_some());
        assert!(first.get("filename").is_some());
        assert!(first.get("savedAt").is_some());
    }
}
