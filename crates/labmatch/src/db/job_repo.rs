//! Job repository: the `matching_jobs` table, one row per subject.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw matching-job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub subject_id: String,
    pub run_id: String,
    pub state: String,
    pub progress: u8,
    pub processed: u32,
    pub skipped: u32,
    pub total: u32,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            subject_id: row.get("subject_id")?,
            run_id: row.get("run_id")?,
            state: row.get("state")?,
            progress: row.get("progress")?,
            processed: row.get("processed")?,
            skipped: row.get("skipped")?,
            total: row.get("total")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            error: row.get("error")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Writes the latest status for a subject, replacing any earlier run.
pub fn upsert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO matching_jobs (subject_id, run_id, state, progress, processed, skipped,
                total, started_at, completed_at, error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(subject_id) DO UPDATE SET run_id = excluded.run_id,
                state = excluded.state, progress = excluded.progress,
                processed = excluded.processed, skipped = excluded.skipped,
                total = excluded.total, started_at = excluded.started_at,
                completed_at = excluded.completed_at, error = excluded.error,
                updated_at = excluded.updated_at",
            params![
                job.subject_id,
                job.run_id,
                job.state,
                job.progress,
                job.processed,
                job.skipped,
                job.total,
                job.started_at,
                job.completed_at,
                job.error,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds the status row for a subject.
pub fn find_by_subject(db: &Database, subject_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM matching_jobs WHERE subject_id = ?1")?;
        let mut rows = stmt.query_map(params![subject_id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns every status row, most recently started first.
pub fn list_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM matching_jobs ORDER BY started_at DESC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
