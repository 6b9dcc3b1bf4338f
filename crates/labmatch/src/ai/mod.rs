//! AI-assisted match scoring.
//!
//! A provider turns a prompt into text; the scorer builds the prompt, parses
//! the structured answer, and falls back to the heuristic engine whenever the
//! provider cannot produce a usable score.

pub mod gemini;
pub mod provider;
pub mod scorer;

pub use gemini::GeminiProvider;
pub use provider::{AiProvider, DisabledProvider, ProviderError};
pub use scorer::{AiScorer, ScoreOutcome, ScoreResult, ScoreSource};
