//! Oracle contracts
//!
//! The pipeline treats text generation as an external black box. Two seams:
//! [`GenerationOracle`] produces prose increments, [`ExtractionOracle`] turns
//! increment text into structured output under deterministic settings. Both
//! are async traits so transports (API clients, local models, test scripts)
//! stay out of the core.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// A request to an oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// System instructions
    pub system: String,
    /// User instructions
    pub user: String,
    /// Requested output size in words
    pub target_size: u64,
    /// Hard output budget in tokens
    pub max_output_tokens: u64,
}

impl OracleRequest {
    /// Build a request
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            target_size: 0,
            max_output_tokens: 8192,
        }
    }

    /// With a word-count target
    #[inline]
    #[must_use]
    pub fn with_target_size(mut self, target_size: u64) -> Self {
        self.target_size = target_size;
        self
    }

    /// With a token budget
    #[inline]
    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: u64) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// Token accounting for one oracle call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the request
    pub input_tokens: u64,
    /// Tokens produced
    pub output_tokens: u64,
}

/// A response from an oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResponse {
    /// Produced text
    pub text: String,
    /// Token accounting
    pub usage: Usage,
}

impl OracleResponse {
    /// Response carrying text and zeroed usage
    #[must_use]
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: Usage::default(),
        }
    }
}

/// Oracle call failures
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Call exceeded its time budget
    #[error("oracle call timed out after {budget_secs}s")]
    Timeout {
        /// Budget that was exceeded
        budget_secs: u64,
    },

    /// Transport or model failure
    #[error("oracle call failed: {0}")]
    Failed(String),

    /// Oracle returned something unusable
    #[error("oracle returned empty output")]
    EmptyOutput,
}

/// Produces prose increments
#[async_trait::async_trait]
pub trait GenerationOracle: Send + Sync {
    /// Run one generation call
    ///
    /// # Errors
    /// Any failure or timeout surfaces as [`OracleError`]; the caller treats
    /// it as a failed increment and owns retry policy.
    async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError>;
}

/// Produces structured output from increment text
///
/// Implementations must use deterministic (zero-temperature-equivalent)
/// settings so extraction is idempotent over the same input text.
#[async_trait::async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Run one extraction call
    ///
    /// # Errors
    /// Any failure or timeout surfaces as [`OracleError`].
    async fn extract(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError>;
}

/// Wrap an oracle call in a time budget
///
/// # Errors
/// Maps an elapsed budget to [`OracleError::Timeout`]; other failures pass
/// through unchanged.
pub async fn call_with_budget<F>(budget: Duration, call: F) -> Result<OracleResponse, OracleError>
where
    F: Future<Output = Result<OracleResponse, OracleError>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout {
            budget_secs: budget.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder() {
        let request = OracleRequest::new("system", "user")
            .with_target_size(2000)
            .with_max_output_tokens(4096);
        assert_eq!(request.target_size, 2000);
        assert_eq!(request.max_output_tokens, 4096);
    }

    #[tokio::test]
    async fn budget_maps_to_timeout() {
        let result = call_with_budget(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(OracleResponse::text_only("late"))
        })
        .await;
        assert!(matches!(result, Err(OracleError::Timeout { .. })));
    }

    #[tokio::test]
    async fn budget_passes_through_success() {
        let result = call_with_budget(Duration::from_secs(1), async {
            Ok(OracleResponse::text_only("on time"))
        })
        .await
        .unwrap();
        assert_eq!(result.text, "on time");
    }
}
