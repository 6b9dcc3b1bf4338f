//! Durable match records, one per (subject, candidate) pair.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{format_timestamp, parse_timestamp};
use crate::ai::ScoreOutcome;
use crate::db::match_repo::{self, MatchRow};
use crate::db::{Database, DatabaseError};
use crate::profile::{Candidate, Subject};
use crate::scoring::HeuristicScore;

/// Errors from writing or reading match records.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// A persisted match between a subject and a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: String,
    pub subject_id: String,
    pub candidate_id: String,
    pub heuristic_score: u8,
    /// Present only when the AI produced a usable score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<f64>,
    /// The AI's full answer, present alongside `ai_score`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<serde_json::Value>,
    pub explanation: String,
    pub highlights: Vec<String>,
    #[serde(default)]
    pub detailed_scores: BTreeMap<String, f64>,
    /// Subject interests at scoring time.
    pub subject_interests: Vec<String>,
    /// Candidate areas at scoring time.
    pub candidate_areas: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchRecord {
    /// The score used for ranking: AI when present, heuristic otherwise.
    pub fn effective_score(&self) -> f64 {
        self.ai_score
            .unwrap_or_else(|| f64::from(self.heuristic_score))
    }

    fn from_row(row: MatchRow) -> Self {
        let ai_analysis = row.ai_analysis.as_deref().and_then(|raw| {
            serde_json::from_str::<serde_json::Value>(raw)
                .map_err(|e| log::warn!("Malformed AI analysis for match {}: {}", row.id, e))
                .ok()
        });
        Self {
            ai_analysis,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            id: row.id,
            subject_id: row.subject_id,
            candidate_id: row.candidate_id,
            heuristic_score: row.heuristic_score,
            ai_score: row.ai_score,
            explanation: row.explanation,
            highlights: row.highlights,
            detailed_scores: row.detailed_scores,
            subject_interests: row.subject_interests,
            candidate_areas: row.candidate_areas,
        }
    }
}

/// The scoring fields written for a pair. Identity and timestamps are
/// assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchUpsert {
    pub subject_id: String,
    pub candidate_id: String,
    pub heuristic_score: u8,
    pub ai_score: Option<f64>,
    pub ai_analysis: Option<serde_json::Value>,
    pub explanation: String,
    pub highlights: Vec<String>,
    pub detailed_scores: BTreeMap<String, f64>,
    pub subject_interests: Vec<String>,
    pub candidate_areas: Vec<String>,
}

impl MatchUpsert {
    /// Combines a heuristic result and a scoring outcome for one pair.
    ///
    /// Highlights are the heuristic ones followed by any outcome highlights
    /// not already listed.
    pub fn from_scoring(
        subject: &Subject,
        candidate: &Candidate,
        heuristic: &HeuristicScore,
        outcome: &ScoreOutcome,
    ) -> Self {
        let mut highlights = heuristic.highlights.clone();
        for highlight in &outcome.result.highlights {
            if !highlights.contains(highlight) {
                highlights.push(highlight.clone());
            }
        }

        Self {
            subject_id: subject.id.clone(),
            candidate_id: candidate.id.clone(),
            heuristic_score: heuristic.score,
            ai_score: outcome.ai_score(),
            ai_analysis: outcome.ai_score().and(outcome.result.analysis.clone()),
            explanation: outcome.result.explanation.clone(),
            highlights,
            detailed_scores: outcome.result.detailed_scores.clone(),
            subject_interests: subject.interests.clone(),
            candidate_areas: candidate.areas.clone(),
        }
    }
}

/// Storage for match records.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Creates or updates the record for the pair. Re-scoring keeps the
    /// record's id and creation time.
    async fn upsert(&self, upsert: MatchUpsert) -> Result<MatchRecord, PersistenceError>;

    async fn get(
        &self,
        subject_id: &str,
        candidate_id: &str,
    ) -> Result<Option<MatchRecord>, PersistenceError>;

    /// A subject's matches, best effective score first.
    async fn list_for_subject(&self, subject_id: &str)
        -> Result<Vec<MatchRecord>, PersistenceError>;

    async fn count_for_subject(&self, subject_id: &str) -> Result<u64, PersistenceError>;
}

/// SQLite-backed match store. Statements run on the blocking pool.
#[derive(Clone)]
pub struct SqliteMatchStore {
    db: Database,
}

impl SqliteMatchStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| PersistenceError::Task(e.to_string()))?
            .map_err(PersistenceError::from)
    }
}

#[async_trait]
impl MatchStore for SqliteMatchStore {
    async fn upsert(&self, upsert: MatchUpsert) -> Result<MatchRecord, PersistenceError> {
        let now = format_timestamp(Utc::now());
        let row = MatchRow {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: upsert.subject_id,
            candidate_id: upsert.candidate_id,
            heuristic_score: upsert.heuristic_score,
            ai_score: upsert.ai_score,
            ai_analysis: upsert.ai_analysis.map(|value| value.to_string()),
            explanation: upsert.explanation,
            highlights: upsert.highlights,
            detailed_scores: upsert.detailed_scores,
            subject_interests: upsert.subject_interests,
            candidate_areas: upsert.candidate_areas,
            created_at: now.clone(),
            updated_at: now,
        };

        let stored = self.run(move |db| match_repo::upsert(db, &row)).await?;
        Ok(MatchRecord::from_row(stored))
    }

    async fn get(
        &self,
        subject_id: &str,
        candidate_id: &str,
    ) -> Result<Option<MatchRecord>, PersistenceError> {
        let subject_id = subject_id.to_string();
        let candidate_id = candidate_id.to_string();
        let row = self
            .run(move |db| match_repo::find_by_pair(db, &subject_id, &candidate_id))
            .await?;
        Ok(row.map(MatchRecord::from_row))
    }

    async fn list_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Vec<MatchRecord>, PersistenceError> {
        let subject_id = subject_id.to_string();
        let rows = self
            .run(move |db| match_repo::list_for_subject(db, &subject_id))
            .await?;
        Ok(rows.into_iter().map(MatchRecord::from_row).collect())
    }

    async fn count_for_subject(&self, subject_id: &str) -> Result<u64, PersistenceError> {
        let subject_id = subject_id.to_string();
        self.run(move |db| match_repo::count_for_subject(db, &subject_id))
            .await
    }
}
