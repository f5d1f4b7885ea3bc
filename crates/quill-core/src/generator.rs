//! Increment generator
//!
//! Builds the next bounded increment request from the session brief, the tail
//! of the prior increment, and state-derived constraints, then invokes the
//! generation oracle once. Verifying that the oracle honored the constraints
//! is the gate's job; retry policy is the controller's.

use crate::error::PipelineError;
use quill_oracle::{call_with_budget, GenerationOracle, OracleRequest, Usage};
use quill_state::CanonicalState;
use std::time::Duration;

/// How much prior-increment tail rides along as continuation context
const CONTINUATION_TAIL_CHARS: usize = 1500;

/// Inputs for one increment request
#[derive(Debug, Clone, Copy)]
pub struct IncrementRequest<'a> {
    /// Session brief (user instructions)
    pub instructions: &'a str,
    /// Canonical state before this increment
    pub state: &'a CanonicalState,
    /// Text of the previous increment, if any
    pub prior_text: Option<&'a str>,
    /// Requested size in words
    pub target_size: u64,
    /// Tolerance band requested of the oracle, fraction of target
    pub size_tolerance: f64,
    /// 1-indexed sequence number
    pub sequence: u64,
    /// First increment of the session
    pub is_first: bool,
    /// Final increment of the session
    pub is_final: bool,
}

/// One generated increment, not yet persisted
#[derive(Debug, Clone)]
pub struct GeneratedIncrement {
    /// The text
    pub text: String,
    /// Size in words
    pub size: u64,
    /// Oracle usage accounting
    pub usage: Usage,
}

/// Wraps the generation oracle with request assembly
#[derive(Debug)]
pub struct IncrementGenerator<O> {
    oracle: O,
    budget: Duration,
}

impl<O: GenerationOracle> IncrementGenerator<O> {
    /// Create a generator with a per-call time budget
    #[inline]
    #[must_use]
    pub fn new(oracle: O, budget: Duration) -> Self {
        Self { oracle, budget }
    }

    /// Generate the next increment
    ///
    /// One oracle call, no internal retry.
    ///
    /// # Errors
    /// `GenerationFailed` with `attempts: 1` on any oracle failure or
    /// timeout; the controller owns backoff and the bounded retry count.
    pub async fn generate(
        &self,
        request: IncrementRequest<'_>,
    ) -> Result<GeneratedIncrement, PipelineError> {
        let oracle_request = build_request(&request);

        let response = call_with_budget(self.budget, self.oracle.generate(&oracle_request))
            .await
            .map_err(|error| PipelineError::GenerationFailed {
                attempts: 1,
                message: error.to_string(),
            })?;

        if response.text.trim().is_empty() {
            return Err(PipelineError::GenerationFailed {
                attempts: 1,
                message: "oracle returned empty output".to_string(),
            });
        }

        let size = response.text.split_whitespace().count() as u64;
        tracing::debug!(
            sequence = request.sequence,
            size,
            target = request.target_size,
            "increment generated"
        );

        Ok(GeneratedIncrement {
            text: response.text,
            size,
            usage: response.usage,
        })
    }
}

fn build_request(request: &IncrementRequest<'_>) -> OracleRequest {
    let mut system = String::from(
        "You are writing one bounded increment of a larger artifact. \
         Continue seamlessly from the provided context. Do not repeat it.",
    );

    let tolerance = (request.target_size as f64 * request.size_tolerance).round() as u64;
    system.push_str(&format!(
        " Produce approximately {} words (within {} words of that target).",
        request.target_size, tolerance
    ));

    if request.is_final {
        system.push_str(" This is the final increment: bring the artifact to a close.");
    } else {
        system.push_str(
            " This is not the final increment: do not conclude, wrap up, or write any ending.",
        );
    }

    // State-derived constraints: every active rule binds this increment;
    // violated rules carry their standing consequences forward.
    let mut constraints = String::new();
    for slot in request.state.active_slots() {
        if let Some(text) = &slot.text {
            let status = if slot.violated {
                " (already violated; its consequences are in effect)"
            } else {
                ""
            };
            constraints.push_str(&format!("- {text}{status}\n"));
        }
    }
    if !request.state.timeline.is_empty() {
        constraints.push_str("Established events, in order:\n");
        for event in &request.state.timeline {
            constraints.push_str(&format!("- {}\n", event.description));
        }
    }
    if !constraints.is_empty() {
        system.push_str("\nFacts that must hold:\n");
        system.push_str(&constraints);
    }

    let mut user = String::new();
    if request.is_first {
        user.push_str(request.instructions);
    } else {
        user.push_str(request.instructions);
        if let Some(prior) = request.prior_text {
            user.push_str("\n\nContinue directly from:\n");
            user.push_str(tail(prior, CONTINUATION_TAIL_CHARS));
        }
    }

    OracleRequest::new(system, user)
        .with_target_size(request.target_size)
        .with_max_output_tokens(request.target_size * 4)
}

/// Last `max_chars` of `text`, respecting char boundaries
fn tail(text: &str, max_chars: usize) -> &str {
    let start = text.len().saturating_sub(max_chars);
    let start = (start..=text.len())
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0);
    &text[start..]
}
