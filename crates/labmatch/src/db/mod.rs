//! SQLite storage for profiles, match records and matching job statuses.
//!
//! Tables: `students`, `candidates`, `matches` (one row per subject and
//! candidate pair) and `matching_jobs` (latest run per subject). The async
//! stores call into the repositories here from the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod match_repo;
pub mod migrations;
pub mod profile_repo;

pub use error::DatabaseError;

/// Shared handle to the labmatch database.
///
/// Clones share one connection. Every repository call takes the lock for
/// the duration of its statements, so a multi-statement upsert never
/// interleaves with another writer.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database file, creating parent directories, and brings
    /// the schema up to date. File databases use WAL journaling.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::prepare(conn)?;
        log::info!("Labmatch database ready at {}", path.display());
        Ok(db)
    }

    /// A private, schema-complete database that disappears when dropped.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive use of the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Where the database lives when the config names no path:
/// `~/.labmatch/data/labmatch.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".labmatch").join("data").join("labmatch.db"))
}

/// Encodes a tag list as JSON text for storage.
pub(crate) fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Decodes a JSON tag list, logging and returning an empty list on bad data.
pub(crate) fn decode_tags(raw: &str, context: &str) -> Vec<String> {
    match serde_json::from_str(raw) {
        Ok(tags) => tags,
        Err(e) => {
            log::warn!("Malformed tag list for {}: {}", context, e);
            Vec::new()
        }
    }
}
