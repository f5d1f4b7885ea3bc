//! The delta extractor

use crate::fallback::heuristic_parse;
use quill_oracle::{call_with_budget, ExtractionOracle, OracleRequest};
use quill_state::{RuleSlot, SlotId, StateDelta};
use std::time::Duration;

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a fact extractor for a long-form \
generation pipeline. Read the chunk and report state changes against the listed \
rules. Respond with a single JSON object and nothing else, using exactly these \
keys: violations (array of rule ids), capabilities (array of {name, value}), \
irreversible (array of {name, value}), timeline (array of strings), facts \
(array of {slot, text}). Omit nothing you observed; invent nothing you did not. \
If JSON is impossible, emit one line per finding in the form \
'capability: <name>' or 'timeline: <event>'.";

/// Where the delta came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    /// Strict JSON parse of oracle output
    Strict,
    /// Regex heuristics over malformed oracle output
    Fallback,
    /// Oracle call failed entirely; delta is empty
    Empty,
}

/// Result of one extraction pass
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// The proposed delta, possibly empty
    pub delta: StateDelta,
    /// How it was obtained
    pub source: ExtractionSource,
}

/// Best-effort delta extraction over increment text
///
/// Never blocks generation progress: every failure mode degrades to a smaller
/// or empty delta instead of an error.
#[derive(Debug)]
pub struct DeltaExtractor<O> {
    oracle: O,
    budget: Duration,
}

impl<O: ExtractionOracle> DeltaExtractor<O> {
    /// Create an extractor with a per-call time budget
    #[inline]
    #[must_use]
    pub fn new(oracle: O, budget: Duration) -> Self {
        Self { oracle, budget }
    }

    /// Extract a delta from one increment's text
    ///
    /// Infallible by design. Strict parse first; regex heuristics over the
    /// oracle's malformed output next; empty delta if the call itself failed.
    pub async fn extract(&self, text: &str, active_slots: &[&RuleSlot]) -> ExtractionOutcome {
        let request = self.build_request(text, active_slots);
        let known: Vec<SlotId> = active_slots.iter().map(|s| s.id.clone()).collect();

        let raw = match call_with_budget(self.budget, self.oracle.extract(&request)).await {
            Ok(response) => response.text,
            Err(error) => {
                tracing::warn!(%error, "extraction oracle failed; continuing with empty delta");
                return ExtractionOutcome {
                    delta: StateDelta::empty(),
                    source: ExtractionSource::Empty,
                };
            }
        };

        if let Some(delta) = parse_strict(&raw) {
            return ExtractionOutcome {
                delta,
                source: ExtractionSource::Strict,
            };
        }

        tracing::warn!("extractor output was not valid JSON; applying heuristic fallback");
        ExtractionOutcome {
            delta: heuristic_parse(&raw, &known),
            source: ExtractionSource::Fallback,
        }
    }

    fn build_request(&self, text: &str, active_slots: &[&RuleSlot]) -> OracleRequest {
        let mut rules = String::new();
        for slot in active_slots {
            let line = match &slot.text {
                Some(text) => format!("- {}: {}\n", slot.id, text),
                None => format!("- {}: (text not yet established)\n", slot.id),
            };
            rules.push_str(&line);
        }

        let user = format!("Rules in force:\n{rules}\nChunk:\n{text}");
        OracleRequest::new(EXTRACTION_SYSTEM_PROMPT, user).with_max_output_tokens(2048)
    }
}

/// Parse strict JSON output, tolerating code fences and surrounding chatter
fn parse_strict(raw: &str) -> Option<StateDelta> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}
