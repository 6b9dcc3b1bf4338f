//! Match repository: idempotent writes and reads for the `matches` table.

use std::collections::BTreeMap;

use rusqlite::{params, Row};

use super::{decode_tags, encode_tags, Database, DatabaseError};

/// A raw match row from the database. Timestamps are RFC 3339 text.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRow {
    pub id: String,
    pub subject_id: String,
    pub candidate_id: String,
    pub heuristic_score: u8,
    pub ai_score: Option<f64>,
    /// The provider's JSON answer, kept verbatim.
    pub ai_analysis: Option<String>,
    pub explanation: String,
    pub highlights: Vec<String>,
    pub detailed_scores: BTreeMap<String, f64>,
    pub subject_interests: Vec<String>,
    pub candidate_areas: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl MatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let id: String = row.get("id")?;
        let highlights: String = row.get("highlights")?;
        let detailed: String = row.get("detailed_scores")?;
        let interests: String = row.get("subject_interests")?;
        let areas: String = row.get("candidate_areas")?;
        let detailed_scores = serde_json::from_str(&detailed).unwrap_or_else(|e| {
            log::warn!("Malformed detailed scores for match {}: {}", id, e);
            BTreeMap::new()
        });

        Ok(Self {
            subject_id: row.get("subject_id")?,
            candidate_id: row.get("candidate_id")?,
            heuristic_score: row.get("heuristic_score")?,
            ai_score: row.get("ai_score")?,
            ai_analysis: row.get("ai_analysis")?,
            explanation: row.get("explanation")?,
            highlights: decode_tags(&highlights, &id),
            detailed_scores,
            subject_interests: decode_tags(&interests, &id),
            candidate_areas: decode_tags(&areas, &id),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            id,
        })
    }
}

/// Creates the row for `(subject_id, candidate_id)` or overwrites its scoring
/// fields in place, keeping `id` and `created_at`. Returns the stored row.
///
/// `row.id` and `row.created_at` are only used when the pair is new.
pub fn upsert(db: &Database, row: &MatchRow) -> Result<MatchRow, DatabaseError> {
    let detailed = serde_json::to_string(&row.detailed_scores).map_err(|e| {
        DatabaseError::CorruptRow {
            table: "matches",
            reason: e.to_string(),
        }
    })?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO matches (id, subject_id, candidate_id, heuristic_score, ai_score,
                ai_analysis, explanation, highlights, detailed_scores, subject_interests,
                candidate_areas, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(subject_id, candidate_id) DO UPDATE SET
                heuristic_score = excluded.heuristic_score,
                ai_score = excluded.ai_score,
                ai_analysis = excluded.ai_analysis,
                explanation = excluded.explanation,
                highlights = excluded.highlights,
                detailed_scores = excluded.detailed_scores,
                subject_interests = excluded.subject_interests,
                candidate_areas = excluded.candidate_areas,
                updated_at = excluded.updated_at",
            params![
                row.id,
                row.subject_id,
                row.candidate_id,
                row.heuristic_score,
                row.ai_score,
                row.ai_analysis,
                row.explanation,
                encode_tags(&row.highlights),
                detailed,
                encode_tags(&row.subject_interests),
                encode_tags(&row.candidate_areas),
                row.created_at,
                row.updated_at,
            ],
        )?;

        let stored = conn.query_row(
            "SELECT * FROM matches WHERE subject_id = ?1 AND candidate_id = ?2",
            params![row.subject_id, row.candidate_id],
            MatchRow::from_row,
        )?;
        Ok(stored)
    })
}

/// Finds the match for a pair.
pub fn find_by_pair(
    db: &Database,
    subject_id: &str,
    candidate_id: &str,
) -> Result<Option<MatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM matches WHERE subject_id = ?1 AND candidate_id = ?2")?;
        let mut rows = stmt.query_map(params![subject_id, candidate_id], MatchRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists a subject's matches, best first (AI score when present, else heuristic).
pub fn list_for_subject(db: &Database, subject_id: &str) -> Result<Vec<MatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM matches WHERE subject_id = ?1
             ORDER BY COALESCE(ai_score, heuristic_score) DESC, candidate_id ASC",
        )?;
        let rows = stmt
            .query_map(params![subject_id], MatchRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts a subject's matches.
pub fn count_for_subject(db: &Database, subject_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM matches WHERE subject_id = ?1",
            params![subject_id],
            |r| r.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    })
}
