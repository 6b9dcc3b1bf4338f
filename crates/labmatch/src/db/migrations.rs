//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const CREATE_STUDENTS: &str = "
CREATE TABLE IF NOT EXISTS students (
    id TEXT PRIMARY KEY NOT NULL,
    interests TEXT NOT NULL DEFAULT '[]',
    methods TEXT NOT NULL DEFAULT '[]',
    degree_level TEXT NOT NULL DEFAULT '',
    hours_per_week INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

const CREATE_CANDIDATES: &str = "
CREATE TABLE IF NOT EXISTS candidates (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    areas TEXT NOT NULL DEFAULT '[]',
    methods TEXT NOT NULL DEFAULT '[]',
    preferred_degree_levels TEXT NOT NULL DEFAULT '[]',
    accepting_matches INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_candidates_accepting ON candidates (accepting_matches);";

const CREATE_MATCHES: &str = "
CREATE TABLE IF NOT EXISTS matches (
    id TEXT PRIMARY KEY NOT NULL,
    subject_id TEXT NOT NULL,
    candidate_id TEXT NOT NULL,
    heuristic_score INTEGER NOT NULL,
    ai_score REAL,
    explanation TEXT NOT NULL DEFAULT '',
    highlights TEXT NOT NULL DEFAULT '[]',
    detailed_scores TEXT NOT NULL DEFAULT '{}',
    subject_interests TEXT NOT NULL DEFAULT '[]',
    candidate_areas TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (subject_id, candidate_id)
);
CREATE INDEX IF NOT EXISTS idx_matches_subject ON matches (subject_id);";

const CREATE_MATCHING_JOBS: &str = "
CREATE TABLE IF NOT EXISTS matching_jobs (
    subject_id TEXT PRIMARY KEY NOT NULL,
    run_id TEXT NOT NULL,
    state TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    error TEXT,
    updated_at TEXT NOT NULL
);";

const ADD_MATCHES_AI_ANALYSIS: &str = "
ALTER TABLE matches ADD COLUMN ai_analysis TEXT;";

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_students_table",
        sql: CREATE_STUDENTS,
    },
    Migration {
        version: 2,
        description: "create_candidates_table",
        sql: CREATE_CANDIDATES,
    },
    Migration {
        version: 3,
        description: "create_matches_table",
        sql: CREATE_MATCHES,
    },
    Migration {
        version: 4,
        description: "create_matching_jobs_table",
        sql: CREATE_MATCHING_JOBS,
    },
    Migration {
        version: 5,
        description: "add_matches_ai_analysis",
        sql: ADD_MATCHES_AI_ANALYSIS,
    },
];

/// Highest migration version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, table: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |r| r.get::<_, u32>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
        for table in ["students", "candidates", "matches", "matching_jobs"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_matches_pair_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let insert = "INSERT INTO matches (id, subject_id, candidate_id, heuristic_score, created_at, updated_at)
                      VALUES (?1, 's1', 'c1', 10, '2026-01-01', '2026-01-01')";
        conn.execute(insert, ["m1"]).unwrap();
        assert!(conn.execute(insert, ["m2"]).is_err());
    }
}
