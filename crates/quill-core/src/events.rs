//! Progress events and the heartbeat
//!
//! The controller publishes typed events over a channel; the transport (push
//! channel, polling) is an external concern. The heartbeat runs concurrently
//! with the increment loop so a caller never sees more than a bounded silence
//! window while a single oracle call is in flight. Its task handle lives in a
//! guard tied to the controller's run scope, so it stops on every exit path.

use crate::types::{SessionId, Stage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Event payload kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressKind {
    /// Session created
    JobCreated {
        /// Owning session
        session_id: SessionId,
        /// Target size in words
        target_size: u64,
    },
    /// A stage began
    StageStart {
        /// Stage name
        stage: Stage,
    },
    /// A stage finished
    StageComplete {
        /// Stage name
        stage: Stage,
    },
    /// An increment's generation began
    IncrementStart {
        /// 1-indexed sequence number
        sequence: u64,
    },
    /// An increment was persisted and tracked
    IncrementComplete {
        /// 1-indexed sequence number
        sequence: u64,
        /// Increment size in words
        size: u64,
        /// Running total across the session
        total_size: u64,
    },
    /// Liveness signal on a fixed interval
    Heartbeat {
        /// Current stage
        stage: Stage,
        /// Increments completed so far
        increments_completed: u64,
    },
    /// Terminal success
    Complete {
        /// Increments produced
        increments: u64,
        /// Final artifact size in words
        total_size: u64,
    },
    /// Terminal failure
    Error {
        /// Stage that failed
        stage: Stage,
        /// Failure message
        message: String,
        /// `infrastructure` or `content`
        error_class: String,
    },
}

impl ProgressKind {
    /// Stable event name for transports
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job_created",
            Self::StageStart { .. } => "stage_start",
            Self::StageComplete { .. } => "stage_complete",
            Self::IncrementStart { .. } => "increment_start",
            Self::IncrementComplete { .. } => "increment_complete",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}

/// One progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Event identifier
    pub id: Uuid,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Payload
    #[serde(flatten)]
    pub kind: ProgressKind,
}

impl ProgressEvent {
    /// Wrap a payload with identity and timestamp
    #[must_use]
    pub fn now(kind: ProgressKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Sending half of the progress stream
///
/// A disconnected receiver never fails the pipeline; events are dropped with
/// a debug log.
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressChannel {
    /// Create a channel pair
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Emit one event
    pub fn emit(&self, kind: ProgressKind) {
        let event = ProgressEvent::now(kind);
        if self.sender.send(event).is_err() {
            tracing::debug!("progress receiver dropped; event discarded");
        }
    }
}

/// Shared liveness status the heartbeat reads
#[derive(Debug)]
pub struct HeartbeatStatus {
    stage: Mutex<Stage>,
    increments: AtomicU64,
}

impl HeartbeatStatus {
    /// Fresh status in `Init`
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stage: Mutex::new(Stage::Init),
            increments: AtomicU64::new(0),
        })
    }

    /// Record a stage change
    pub fn set_stage(&self, stage: Stage) {
        *self.stage.lock() = stage;
    }

    /// Record a completed increment
    pub fn record_increment(&self) {
        self.increments.fetch_add(1, Ordering::Relaxed);
    }

    /// Seed the completed-increment count (used on resume)
    pub fn set_increments(&self, count: u64) {
        self.increments.store(count, Ordering::Relaxed);
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> (Stage, u64) {
        (*self.stage.lock(), self.increments.load(Ordering::Relaxed))
    }
}

/// Aborts the heartbeat task when dropped
#[derive(Debug)]
pub struct HeartbeatGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl HeartbeatGuard {
    /// Spawn a heartbeat emitting on `interval` until dropped
    #[must_use]
    pub fn start(
        channel: ProgressChannel,
        status: Arc<HeartbeatStatus>,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so heartbeats start
            // one interval after session start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (stage, increments_completed) = status.snapshot();
                channel.emit(ProgressKind::Heartbeat {
                    stage,
                    increments_completed,
                });
            }
        });
        Self { handle }
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
