//! AI match scoring with a guaranteed heuristic fallback.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::provider::{AiProvider, ProviderError};
use crate::profile::{Candidate, Subject};
use crate::scoring::{fallback_explanation, HeuristicScore};

/// Default bound on a single provider call.
pub const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest tag text copied into a prompt.
const MAX_PROMPT_TAG_CHARS: usize = 100;

/// Where a score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Ai,
    Heuristic,
}

/// A usable compatibility score with its explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    /// In `(0, 100]` for AI results, `0..=100` for the heuristic fallback.
    pub score: f64,
    /// Never empty.
    pub explanation: String,
    pub highlights: Vec<String>,
    pub detailed_scores: BTreeMap<String, f64>,
    /// The provider's full JSON answer, including keys not parsed above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<serde_json::Value>,
}

impl ScoreResult {
    /// Fallback result built entirely from the heuristic engine.
    pub fn from_heuristic(heuristic: &HeuristicScore) -> Self {
        Self {
            score: f64::from(heuristic.score),
            explanation: fallback_explanation(heuristic.score),
            highlights: heuristic.highlights.clone(),
            detailed_scores: BTreeMap::new(),
            analysis: None,
        }
    }
}

/// Final scoring result for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub result: ScoreResult,
    pub source: ScoreSource,
}

impl ScoreOutcome {
    pub fn heuristic(heuristic: &HeuristicScore) -> Self {
        Self {
            result: ScoreResult::from_heuristic(heuristic),
            source: ScoreSource::Heuristic,
        }
    }

    /// The AI score, present only when the AI produced a usable one.
    pub fn ai_score(&self) -> Option<f64> {
        match self.source {
            ScoreSource::Ai => Some(self.result.score),
            ScoreSource::Heuristic => None,
        }
    }
}

/// Structured answer requested from the provider.
#[derive(Debug, Deserialize)]
struct AiMatchResponse {
    #[serde(default, alias = "score")]
    overall_score: Option<f64>,
    #[serde(default)]
    highlights: Vec<String>,
    #[serde(default)]
    detailed_scores: BTreeMap<String, serde_json::Value>,
    #[serde(default, alias = "explanation")]
    reasoning: Option<String>,
}

/// Scores candidates through an AI provider.
///
/// Build once and share between jobs; the provider is used concurrently.
#[derive(Clone)]
pub struct AiScorer {
    provider: Arc<dyn AiProvider>,
    timeout: Duration,
}

impl AiScorer {
    pub fn new(provider: Arc<dyn AiProvider>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_AI_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Scores the pair, falling back to `heuristic` on any provider error.
    pub async fn score(
        &self,
        subject: &Subject,
        candidate: &Candidate,
        heuristic: &HeuristicScore,
    ) -> ScoreOutcome {
        match self.try_ai_score(subject, candidate).await {
            Ok(result) => ScoreOutcome {
                result,
                source: ScoreSource::Ai,
            },
            Err(e) => {
                warn!(
                    subject_id = %subject.id,
                    candidate_id = %candidate.id,
                    provider = self.provider.name(),
                    error = %e,
                    "AI scoring failed, using heuristic fallback"
                );
                ScoreOutcome::heuristic(heuristic)
            }
        }
    }

    /// Makes exactly one provider call, bounded by the configured timeout.
    pub async fn try_ai_score(
        &self,
        subject: &Subject,
        candidate: &Candidate,
    ) -> Result<ScoreResult, ProviderError> {
        let prompt = build_prompt(subject, candidate);
        debug!(candidate_id = %candidate.id, "Generated match prompt:\n{}", prompt);

        let text = tokio::time::timeout(self.timeout, self.provider.generate(&prompt))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;
        debug!(candidate_id = %candidate.id, "AI response:\n{}", text);

        parse_response(&text)
    }
}

/// Strips prompt-breaking sequences and control characters from profile text.
fn sanitize_for_prompt(text: &str) -> String {
    text.replace("```", "'''")
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(MAX_PROMPT_TAG_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

fn tag_list(tags: &[String]) -> String {
    if tags.is_empty() {
        return "(none)".to_string();
    }
    tags.iter()
        .map(|t| sanitize_for_prompt(t))
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_prompt(subject: &Subject, candidate: &Candidate) -> String {
    let mut prompt = String::new();
    prompt.push_str("Calculate a research match score between this student and professor.\n\n");

    // Writing to a String cannot fail.
    let _ = writeln!(prompt, "Student:");
    let _ = writeln!(prompt, "- Degree level: {}", sanitize_for_prompt(&subject.degree_level));
    let _ = writeln!(prompt, "- Research interests: {}", tag_list(&subject.interests));
    let _ = writeln!(prompt, "- Methods: {}", tag_list(&subject.methods));
    let _ = writeln!(
        prompt,
        "- Hours per week: {}",
        subject.hours_per_week.unwrap_or(0)
    );
    let _ = writeln!(prompt, "\nProfessor:");
    if !candidate.name.is_empty() {
        let _ = writeln!(prompt, "- Name: {}", sanitize_for_prompt(&candidate.name));
    }
    let _ = writeln!(prompt, "- Research areas: {}", tag_list(&candidate.areas));
    let _ = writeln!(prompt, "- Methods: {}", tag_list(&candidate.methods));
    let _ = writeln!(
        prompt,
        "- Preferred degree levels: {}",
        tag_list(&candidate.preferred_degree_levels)
    );

    prompt.push_str(
        "\nConsider research area alignment, skill compatibility, academic level fit, \
         availability and growth potential, each from 0 to 100.\n\
         Respond with a single JSON object with keys:\n\
         - overall_score: number from 0 to 100\n\
         - highlights: array of short strings\n\
         - detailed_scores: object mapping criterion name to number\n\
         - reasoning: two or three sentences explaining the match\n",
    );
    prompt
}

/// Returns the outermost `{...}` span, skipping code fences or prose around it.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    text.get(start..=end)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn parse_response(text: &str) -> Result<ScoreResult, ProviderError> {
    let json = extract_json_object(text).ok_or_else(|| {
        ProviderError::MalformedResponse("no JSON object in response".to_string())
    })?;
    let analysis: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let parsed: AiMatchResponse = serde_json::from_value(analysis.clone())
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    let raw_score = parsed.overall_score.ok_or(ProviderError::MissingScore)?;
    if !raw_score.is_finite() {
        return Err(ProviderError::MalformedResponse(format!(
            "score is not a finite number: {}",
            raw_score
        )));
    }
    // Checked after rounding so a score that rounds to zero is not stored.
    let score = round2(raw_score.min(100.0));
    if score <= 0.0 {
        return Err(ProviderError::NonPositiveScore(raw_score));
    }

    let explanation = parsed
        .reasoning
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| format!("AI match score {}/100", score));

    let highlights = parsed
        .highlights
        .into_iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();

    let detailed_scores = parsed
        .detailed_scores
        .into_iter()
        .filter_map(|(name, value)| value.as_f64().map(|v| (name, round2(v))))
        .collect();

    Ok(ScoreResult {
        score,
        explanation,
        highlights,
        detailed_scores,
        analysis: Some(analysis),
    })
}
