//! Profile repository: the `students` and `candidates` tables.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{decode_tags, encode_tags, Database, DatabaseError};
use crate::profile::{Candidate, Subject};

fn student_from_row(row: &Row<'_>) -> Result<Subject, rusqlite::Error> {
    let id: String = row.get("id")?;
    let interests: String = row.get("interests")?;
    let methods: String = row.get("methods")?;
    Ok(Subject {
        interests: decode_tags(&interests, &id),
        methods: decode_tags(&methods, &id),
        degree_level: row.get("degree_level")?,
        hours_per_week: row.get("hours_per_week")?,
        id,
    })
}

fn candidate_from_row(row: &Row<'_>) -> Result<Candidate, rusqlite::Error> {
    let id: String = row.get("id")?;
    let areas: String = row.get("areas")?;
    let methods: String = row.get("methods")?;
    let levels: String = row.get("preferred_degree_levels")?;
    Ok(Candidate {
        name: row.get("name")?,
        areas: decode_tags(&areas, &id),
        methods: decode_tags(&methods, &id),
        preferred_degree_levels: decode_tags(&levels, &id),
        accepting_matches: row.get("accepting_matches")?,
        id,
    })
}

/// Inserts a student, or overwrites every field of an existing one.
pub fn upsert_student(db: &Database, subject: &Subject) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO students (id, interests, methods, degree_level, hours_per_week, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET interests = excluded.interests,
                methods = excluded.methods, degree_level = excluded.degree_level,
                hours_per_week = excluded.hours_per_week, updated_at = excluded.updated_at",
            params![
                subject.id,
                encode_tags(&subject.interests),
                encode_tags(&subject.methods),
                subject.degree_level,
                subject.hours_per_week,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Inserts a candidate, or overwrites every field of an existing one.
pub fn upsert_candidate(db: &Database, candidate: &Candidate) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO candidates (id, name, areas, methods, preferred_degree_levels,
                accepting_matches, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, areas = excluded.areas,
                methods = excluded.methods,
                preferred_degree_levels = excluded.preferred_degree_levels,
                accepting_matches = excluded.accepting_matches,
                updated_at = excluded.updated_at",
            params![
                candidate.id,
                candidate.name,
                encode_tags(&candidate.areas),
                encode_tags(&candidate.methods),
                encode_tags(&candidate.preferred_degree_levels),
                candidate.accepting_matches,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Finds a student by ID.
pub fn find_student(db: &Database, id: &str) -> Result<Option<Subject>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM students WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], student_from_row)?;
        match rows.next() {
            Some(Ok(subject)) => Ok(Some(subject)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists candidates accepting new matches, ordered by ID.
pub fn list_accepting_candidates(db: &Database) -> Result<Vec<Candidate>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM candidates WHERE accepting_matches = 1 ORDER BY id")?;
        let candidates = stmt
            .query_map([], candidate_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(candidates)
    })
}
