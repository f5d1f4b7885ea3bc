//! In-memory session registry
//!
//! Sessions are registered at creation and updated as stages advance. Nothing
//! is removed while a session runs; a periodic sweep garbage-collects
//! terminal sessions once they age past a retention window.

use crate::types::{Session, SessionId, Stage};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::time::Duration;

/// Concurrent map of live and recently-finished sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session
    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.id, session);
    }

    /// Snapshot of one session
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    /// Number of tracked sessions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Record a stage change
    ///
    /// Ignores unknown ids; the registry is an observability surface, not an
    /// authority, so a missing entry must not fail the pipeline.
    pub fn update_stage(&self, id: &SessionId, stage: Stage) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.stage = stage;
            entry.updated_at = Utc::now();
        }
    }

    /// Remove terminal sessions older than `retention`
    ///
    /// Running sessions are never removed regardless of age. Returns the
    /// number of sessions swept.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - ChronoDuration::from_std(retention).unwrap_or(ChronoDuration::MAX);
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !(session.stage.is_terminal() && session.updated_at < cutoff));
        let swept = before - self.sessions.len();
        if swept > 0 {
            tracing::debug!(swept, "expired sessions removed from registry");
        }
        swept
    }
}
