//! Testing utilities for the Quill workspace
//!
//! Scripted oracles, fixture contracts, and tracing setup shared across
//! integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use quill_oracle::{
    ExtractionOracle, GenerationOracle, OracleError, OracleRequest, OracleResponse,
};
use quill_state::{Consequences, Contract, SlotSeed};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One scripted oracle step
#[derive(Debug, Clone)]
pub enum Step {
    /// Respond with this text
    Reply(String),
    /// Fail the call
    Fail(String),
    /// Sleep past any budget, then reply (forces a timeout upstream)
    Stall(Duration),
}

impl Step {
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply(text.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

/// An oracle that replays a queued script
///
/// Implements both oracle traits so one instance can script either seam.
/// Records every request for later assertions. An exhausted script fails the
/// call, so tests notice when the pipeline makes more calls than expected.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    steps: Arc<Mutex<VecDeque<Step>>>,
    requests: Arc<Mutex<Vec<OracleRequest>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    pub fn with_step(self, step: Step) -> Self {
        self.push(step);
        self
    }

    /// Queue `count` replies of the same text
    pub fn with_replies(self, text: &str, count: usize) -> Self {
        for _ in 0..count {
            self.push(Step::reply(text));
        }
        self
    }

    /// Every request the oracle has seen, in call order
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    async fn answer(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        self.requests.lock().push(request.clone());
        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(OracleResponse::text_only(text)),
            Some(Step::Fail(message)) => Err(OracleError::Failed(message)),
            Some(Step::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(OracleResponse::text_only("too late"))
            }
            None => Err(OracleError::Failed("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl GenerationOracle for ScriptedOracle {
    async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        self.answer(request).await
    }
}

#[async_trait]
impl ExtractionOracle for ScriptedOracle {
    async fn extract(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        self.answer(request).await
    }
}

/// A block of prose with an exact word count
pub fn prose(words: u64) -> String {
    let mut text = String::new();
    for i in 0..words {
        if i > 0 {
            text.push(' ');
        }
        text.push_str("word");
    }
    text
}

/// Extractor reply asserting no state changes
pub fn empty_delta_json() -> String {
    r#"{"violations":[],"capabilities":[],"irreversible":[],"timeline":[],"facts":[]}"#.to_string()
}

/// Extractor reply asserting one rule violation
pub fn violation_delta_json(slot: &str) -> String {
    format!(r#"{{"violations":["{slot}"]}}"#)
}

/// A small contract with two threshold-1 rules, the first carrying a
/// permanent consequence
pub fn fixture_contract() -> Contract {
    Contract::new(8)
        .with_slot(
            SlotSeed::new("no_mirrors")
                .with_text("no mirrors after midnight")
                .with_consequences(Consequences {
                    immediate: vec!["sees_the_other_side".to_string()],
                    delayed: vec![],
                    permanent: vec!["contamination".to_string()],
                }),
        )
        .with_slot(SlotSeed::new("stay_inside").with_text("never leave the house at night"))
}

/// Install a test tracing subscriber; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
