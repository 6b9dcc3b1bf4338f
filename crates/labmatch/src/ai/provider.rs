use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that make an AI score unusable.
///
/// Every variant is recovered by the heuristic fallback; none of them reach
/// a job's terminal state.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("AI provider request failed: {0}")]
    Request(String),

    #[error("AI provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse AI response: {0}")]
    MalformedResponse(String),

    #[error("AI response has no score field")]
    MissingScore,

    #[error("AI response score {0} is not positive")]
    NonPositiveScore(f64),

    #[error("AI provider not configured")]
    NotConfigured,
}

/// A text-generation backend.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Generates a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

/// Provider used when no AI backend is configured; every call falls back.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProvider;

#[async_trait]
impl AiProvider for DisabledProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}
