//! Match records and job statuses.

use chrono::{DateTime, Utc};

pub mod job_status;
pub mod match_store;

pub use job_status::{JobState, JobStatus, JobStatusStore};
pub use match_store::{MatchRecord, MatchStore, MatchUpsert, PersistenceError, SqliteMatchStore};

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
