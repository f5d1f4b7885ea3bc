//! The increment store
//!
//! All writes go through [`IncrementStore::write_atomic`]: serialize to a
//! `.tmp` sibling, then rename into place. If the rename fails the temporary
//! file is removed and the error surfaces as
//! [`StoreError::PersistenceFailed`].

use crate::error::StoreError;
use crate::increment::IncrementFile;
use crate::manifest::{Manifest, ManifestEntry};
use crate::report::FailureReport;
use quill_state::CanonicalState;
use serde::Serialize;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "manifest.json";
const STATE_FILE: &str = "state.json";
const FAILURE_REPORT_FILE: &str = "failure_report.json";
const ARTIFACT_FILE: &str = "final.txt";

/// Outcome of a successful persist
#[derive(Debug, Clone)]
pub struct PersistedIncrement {
    /// Final path of the increment file
    pub path: PathBuf,
    /// Manifest entry describing the increment
    pub entry: ManifestEntry,
}

/// Durable store rooted at a sessions directory
///
/// One subdirectory per session. Increment files are immutable once renamed
/// into place; the manifest and state snapshot are rewritten whole.
#[derive(Debug, Clone)]
pub struct IncrementStore {
    root: PathBuf,
}

impl IncrementStore {
    /// Create a store rooted at `root`
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding a session's artifacts
    #[inline]
    #[must_use]
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    async fn write_atomic(&self, final_path: &Path, contents: &str) -> Result<(), StoreError> {
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact");
        let tmp_path = final_path.with_file_name(format!("{file_name}.tmp"));

        tokio::fs::write(&tmp_path, contents)
            .await
            .map_err(|source| StoreError::PersistenceFailed {
                path: final_path.to_path_buf(),
                source,
            })?;

        if let Err(source) = tokio::fs::rename(&tmp_path, final_path).await {
            // Leave no torn temporary behind; the final path was never touched.
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::PersistenceFailed {
                path: final_path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }

    /// Persist one increment atomically
    ///
    /// # Errors
    /// `PersistenceFailed` if the write or rename fails; the session's prior
    /// increments are unaffected.
    pub async fn persist(
        &self,
        session_id: &str,
        sequence: u64,
        text: &str,
        size: u64,
    ) -> Result<PersistedIncrement, StoreError> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let file = IncrementFile::new(session_id, sequence, text, size);
        let filename = IncrementFile::filename(sequence);
        let path = dir.join(&filename);
        self.write_atomic(&path, &file.render()).await?;

        tracing::debug!(session = session_id, sequence, size, "increment persisted");
        Ok(PersistedIncrement {
            path,
            entry: ManifestEntry {
                number: sequence,
                filename,
                size,
                saved_at: file.saved_at,
                checksum: file.checksum,
            },
        })
    }

    /// Rewrite the session manifest atomically
    ///
    /// # Errors
    /// Fails if the manifest violates its own invariants or the write fails.
    pub async fn rewrite_manifest(&self, manifest: &Manifest) -> Result<PathBuf, StoreError> {
        manifest.validate()?;
        let dir = self.session_dir(&manifest.session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(manifest)?;
        self.write_atomic(&path, &json).await?;
        Ok(path)
    }

    /// Load the session manifest
    ///
    /// # Errors
    /// `SessionNotFound` if no manifest exists yet.
    pub async fn load_manifest(&self, session_id: &str) -> Result<Manifest, StoreError> {
        let path = self.session_dir(session_id).join(MANIFEST_FILE);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| StoreError::SessionNotFound(session_id.to_string()))?;
        let manifest: Manifest = serde_json::from_str(&raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load every fully-persisted increment, bypassing the manifest
    ///
    /// Tolerates a partially-written session: files that fail to parse or
    /// fail their checksum are skipped with a warning, and whatever remains
    /// is returned ordered by sequence number.
    ///
    /// # Errors
    /// `SessionNotFound` if the session directory does not exist.
    pub async fn load_all(&self, session_id: &str) -> Result<Vec<IncrementFile>, StoreError> {
        let dir = self.session_dir(session_id);
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|_| StoreError::SessionNotFound(session_id.to_string()))?;

        let mut increments = Vec::new();
        while let Some(dir_entry) = read_dir.next_entry().await? {
            let path = dir_entry.path();
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("increment_") || !name.ends_with(".txt") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path).await?;
            match IncrementFile::parse(&raw) {
                Ok(increment) => increments.push(increment),
                Err(reason) => {
                    tracing::warn!(?path, reason, "skipping unreadable increment file");
                }
            }
        }

        increments.sort_by_key(|i| i.sequence);
        increments.dedup_by_key(|i| i.sequence);
        Ok(increments)
    }

    /// Load one increment by its filename, verifying the embedded checksum
    ///
    /// # Errors
    /// `CorruptIncrement` if the file is missing, torn, or fails its
    /// checksum.
    pub async fn load_increment(
        &self,
        session_id: &str,
        filename: &str,
    ) -> Result<IncrementFile, StoreError> {
        let path = self.session_dir(session_id).join(filename);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| StoreError::CorruptIncrement {
                path: path.clone(),
                reason: source.to_string(),
            })?;
        IncrementFile::parse(&raw).map_err(|reason| StoreError::CorruptIncrement { path, reason })
    }

    /// Snapshot canonical state atomically
    ///
    /// # Errors
    /// `PersistenceFailed` if the write or rename fails.
    pub async fn save_state(
        &self,
        session_id: &str,
        state: &CanonicalState,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(STATE_FILE);
        let json = serde_json::to_string_pretty(state)?;
        self.write_atomic(&path, &json).await?;
        Ok(path)
    }

    /// Load the canonical state snapshot
    ///
    /// # Errors
    /// `SessionNotFound` if no snapshot exists.
    pub async fn load_state(&self, session_id: &str) -> Result<CanonicalState, StoreError> {
        let path = self.session_dir(session_id).join(STATE_FILE);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| StoreError::SessionNotFound(session_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist a per-increment gate verdict as an audit artifact
    ///
    /// # Errors
    /// `PersistenceFailed` if the write or rename fails.
    pub async fn write_gate_audit<T: Serialize>(
        &self,
        session_id: &str,
        sequence: u64,
        audit: &T,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("gate_{sequence:04}.json"));
        let json = serde_json::to_string_pretty(audit)?;
        self.write_atomic(&path, &json).await?;
        Ok(path)
    }

    /// Persist the assembled artifact
    ///
    /// # Errors
    /// `PersistenceFailed` if the write or rename fails.
    pub async fn write_artifact(
        &self,
        session_id: &str,
        artifact: &str,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(ARTIFACT_FILE);
        self.write_atomic(&path, artifact).await?;
        tracing::info!(session = session_id, bytes = artifact.len(), "artifact written");
        Ok(path)
    }

    /// Load the assembled artifact
    ///
    /// # Errors
    /// `SessionNotFound` if no artifact was written.
    pub async fn load_artifact(&self, session_id: &str) -> Result<String, StoreError> {
        let path = self.session_dir(session_id).join(ARTIFACT_FILE);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| StoreError::SessionNotFound(session_id.to_string()))
    }

    /// Persist a whole-artifact pass report
    ///
    /// # Errors
    /// `PersistenceFailed` if the write or rename fails.
    pub async fn write_pass_report<T: Serialize>(
        &self,
        session_id: &str,
        pass: &str,
        report: &T,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("pass_{pass}.json"));
        let json = serde_json::to_string_pretty(report)?;
        self.write_atomic(&path, &json).await?;
        Ok(path)
    }

    /// Persist the failure report for a failed session
    ///
    /// # Errors
    /// `PersistenceFailed` if the write or rename fails.
    pub async fn write_failure_report(
        &self,
        report: &FailureReport,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(&report.session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(FAILURE_REPORT_FILE);
        let json = serde_json::to_string_pretty(report)?;
        self.write_atomic(&path, &json).await?;
        Ok(path)
    }

    /// Load a session's failure report, if one was written
    ///
    /// # Errors
    /// `SessionNotFound` if no report exists.
    pub async fn load_failure_report(
        &self,
        session_id: &str,
    ) -> Result<FailureReport, StoreError> {
        let path = self.session_dir(session_id).join(FAILURE_REPORT_FILE);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| StoreError::SessionNotFound(session_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }
}
