//! Per-subject matching job status with persistent database storage.
//!
//! The store is the only writer of [`JobStatus`]. Every change is cached,
//! persisted when a database is attached, and broadcast to subscribers.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use super::{format_timestamp, parse_timestamp};
use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};

/// Capacity of the status broadcast channel.
const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Error recorded for runs that were active when the process stopped.
pub const INTERRUPTED_ERROR: &str = "interrupted before completion";

// ─── State ──────────────────────────────────────────────────────────────────

/// Lifecycle state of a matching run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Reporting sentinel for subjects that never had a run. Never stored.
    NotFound,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::InProgress => "in_progress",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::NotFound => "not_found",
        }
    }

    /// Pending and in-progress runs block a new run for the same subject.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Pending | JobState::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    fn parse(s: &str, subject_id: &str) -> Self {
        match s {
            "pending" => JobState::Pending,
            "in_progress" => JobState::InProgress,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            other => {
                log::warn!(
                    "Unknown job state '{}' for subject {}, treating as failed",
                    other,
                    subject_id
                );
                JobState::Failed
            }
        }
    }
}

// ─── JobStatus ──────────────────────────────────────────────────────────────

/// Snapshot of a subject's most recent matching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub subject_id: String,
    /// Identifies the run; absent only for the not-found sentinel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub state: JobState,
    /// Percent of candidates handled, `0..=100`. Never decreases within a run.
    pub progress: u8,
    pub processed: u32,
    pub skipped: u32,
    pub total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    /// The status reported for a subject with no recorded run.
    pub fn not_found(subject_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            run_id: None,
            state: JobState::NotFound,
            progress: 0,
            processed: 0,
            skipped: 0,
            total: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    fn started(subject_id: &str) -> Self {
        Self {
            run_id: Some(uuid::Uuid::new_v4().to_string()),
            state: JobState::InProgress,
            started_at: Some(Utc::now()),
            ..Self::not_found(subject_id)
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    fn from_job_row(row: &JobRow) -> Self {
        Self {
            subject_id: row.subject_id.clone(),
            run_id: Some(row.run_id.clone()),
            state: JobState::parse(&row.state, &row.subject_id),
            progress: row.progress.min(100),
            processed: row.processed,
            skipped: row.skipped,
            total: row.total,
            started_at: Some(parse_timestamp(&row.started_at)),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
            error: row.error.clone(),
        }
    }

    fn to_job_row(&self) -> JobRow {
        let now = Utc::now();
        JobRow {
            subject_id: self.subject_id.clone(),
            run_id: self.run_id.clone().unwrap_or_default(),
            state: self.state.as_str().to_string(),
            progress: self.progress,
            processed: self.processed,
            skipped: self.skipped,
            total: self.total,
            started_at: format_timestamp(self.started_at.unwrap_or(now)),
            completed_at: self.completed_at.map(format_timestamp),
            error: self.error.clone(),
            updated_at: format_timestamp(now),
        }
    }
}

// ─── JobStatusStore ─────────────────────────────────────────────────────────

/// Status store keyed by subject id.
///
/// Every change holds the writer lock while it updates the cache, persists
/// the row and broadcasts, so the database and subscribers see changes in
/// the order they were made. Database writes run on the blocking pool.
/// The `std::sync::RwLock`s are never held across an `.await`.
pub struct JobStatusStore {
    db: RwLock<Option<Database>>,
    cache: RwLock<HashMap<String, JobStatus>>,
    writer: Mutex<()>,
    sender: broadcast::Sender<JobStatus>,
}

impl Default for JobStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStatusStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            db: RwLock::new(None),
            cache: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            sender,
        }
    }

    /// Attaches a database; later changes are persisted to it.
    pub fn set_database(&self, db: Database) {
        let mut guard = match self.db.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job status DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = Some(db);
    }

    /// Gets a cloned database handle if available.
    pub fn get_database(&self) -> Option<Database> {
        let guard = match self.db.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job status DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    /// Receives every status change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobStatus> {
        self.sender.subscribe()
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<String, JobStatus>> {
        match self.cache.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job status cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<String, JobStatus>> {
        match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job status cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Starts a run for `subject_id` unless one is already active.
    ///
    /// The check and the reset happen under the writer lock, so of two
    /// concurrent callers exactly one gets `Some`.
    pub async fn try_begin(&self, subject_id: &str) -> Option<JobStatus> {
        let _writer = self.writer.lock().await;
        let status = {
            let mut cache = self.write_cache();
            if cache.get(subject_id).is_some_and(JobStatus::is_active) {
                return None;
            }
            let status = JobStatus::started(subject_id);
            cache.insert(subject_id.to_string(), status.clone());
            status
        };

        self.publish(&status).await;
        Some(status)
    }

    /// Records the candidate count for the run.
    pub async fn set_total(&self, subject_id: &str, run_id: &str, total: u32) -> Option<JobStatus> {
        self.update_run(subject_id, run_id, |status| status.total = total)
            .await
    }

    /// Records per-candidate progress. Progress below the current value is ignored.
    pub async fn record_progress(
        &self,
        subject_id: &str,
        run_id: &str,
        progress: u8,
        processed: u32,
        skipped: u32,
    ) -> Option<JobStatus> {
        self.update_run(subject_id, run_id, |status| {
            status.progress = status.progress.max(progress.min(100));
            status.processed = processed;
            status.skipped = skipped;
        })
        .await
    }

    /// Marks the run completed at 100%.
    pub async fn complete(&self, subject_id: &str, run_id: &str) -> Option<JobStatus> {
        self.update_run(subject_id, run_id, |status| {
            status.state = JobState::Completed;
            status.progress = 100;
            status.completed_at = Some(Utc::now());
            status.error = None;
        })
        .await
    }

    /// Marks the run failed, keeping the progress it reached.
    pub async fn fail(&self, subject_id: &str, run_id: &str, error: &str) -> Option<JobStatus> {
        self.update_run(subject_id, run_id, |status| {
            status.state = JobState::Failed;
            status.completed_at = Some(Utc::now());
            status.error = Some(error.to_string());
        })
        .await
    }

    /// Applies `f` to the active run `run_id`, then persists and broadcasts.
    /// Returns `None` when that run is no longer the subject's active run.
    async fn update_run<F>(&self, subject_id: &str, run_id: &str, f: F) -> Option<JobStatus>
    where
        F: FnOnce(&mut JobStatus) + Send,
    {
        let _writer = self.writer.lock().await;
        let status = {
            let mut cache = self.write_cache();
            let status = cache.get_mut(subject_id)?;
            if status.run_id.as_deref() != Some(run_id) || !status.is_active() {
                log::debug!(
                    "Ignoring update for stale run {} of subject {}",
                    run_id,
                    subject_id
                );
                return None;
            }
            f(status);
            status.clone()
        };

        self.publish(&status).await;
        Some(status)
    }

    /// Persists and broadcasts one change. Callers hold the writer lock.
    async fn publish(&self, status: &JobStatus) {
        if let Some(db) = self.get_database() {
            let row = status.to_job_row();
            match tokio::task::spawn_blocking(move || job_repo::upsert(&db, &row)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!(
                    "Failed to persist job status for subject {}: {}",
                    status.subject_id,
                    e
                ),
                Err(e) => log::error!(
                    "Job status write task failed for subject {}: {}",
                    status.subject_id,
                    e
                ),
            }
        }
        // No receivers is not an error.
        let _ = self.sender.send(status.clone());
    }

    /// Current status for a subject, or the not-found sentinel.
    pub fn get(&self, subject_id: &str) -> JobStatus {
        self.read_cache()
            .get(subject_id)
            .cloned()
            .unwrap_or_else(|| JobStatus::not_found(subject_id))
    }

    /// All known statuses, most recently started first.
    pub fn get_all(&self) -> Vec<JobStatus> {
        let mut result: Vec<JobStatus> = self.read_cache().values().cloned().collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result
    }

    /// Restores statuses from the attached database.
    ///
    /// Runs that were still active are marked failed, since no task is
    /// driving them any more. Entries already cached are kept. Returns the
    /// number of statuses restored. Call at startup, before any run begins.
    pub fn load_from_database(&self) -> Result<usize, DatabaseError> {
        let Some(db) = self.get_database() else {
            return Ok(0);
        };

        let rows = job_repo::list_all(&db)?;
        let mut restored = 0;
        for row in &rows {
            let mut status = JobStatus::from_job_row(row);
            if status.is_active() {
                log::warn!(
                    "Matching run {} for subject {} was interrupted, marking failed",
                    row.run_id,
                    row.subject_id
                );
                status.state = JobState::Failed;
                status.completed_at = Some(Utc::now());
                status.error = Some(INTERRUPTED_ERROR.to_string());
                job_repo::upsert(&db, &status.to_job_row())?;
            }

            let mut cache = self.write_cache();
            if !cache.contains_key(&status.subject_id) {
                cache.insert(status.subject_id.clone(), status);
                restored += 1;
            }
        }

        log::info!("Restored {} matching job statuses from database", restored);
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn run_id(status: &JobStatus) -> String {
        status.run_id.clone().unwrap()
    }

    #[test]
    fn test_unknown_subject_is_not_found() {
        let store = JobStatusStore::new();
        let status = store.get("nobody");
        assert_eq!(status.state, JobState::NotFound);
        assert_eq!(status.progress, 0);
        assert!(status.run_id.is_none());
    }

    #[tokio::test]
    async fn test_begin_rejects_second_active_run() {
        let store = JobStatusStore::new();
        let first = store.try_begin("s1").await.unwrap();
        assert_eq!(first.state, JobState::InProgress);
        assert_eq!(first.progress, 0);
        assert!(first.started_at.is_some());

        assert!(store.try_begin("s1").await.is_none());
        assert!(store.try_begin("s2").await.is_some());
    }

    #[tokio::test]
    async fn test_begin_after_terminal_starts_fresh_run() {
        let store = JobStatusStore::new();
        let first = store.try_begin("s1").await.unwrap();
        store.fail("s1", &run_id(&first), "boom").await.unwrap();

        let second = store.try_begin("s1").await.unwrap();
        assert_ne!(second.run_id, first.run_id);
        assert_eq!(second.state, JobState::InProgress);
        assert_eq!(second.error, None);
        assert_eq!(second.completed_at, None);
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let store = JobStatusStore::new();
        let run = run_id(&store.try_begin("s1").await.unwrap());

        store.record_progress("s1", &run, 50, 2, 0).await.unwrap();
        let status = store.record_progress("s1", &run, 25, 3, 1).await.unwrap();
        assert_eq!(status.progress, 50);
        assert_eq!(status.processed, 3);
        assert_eq!(status.skipped, 1);
    }

    #[tokio::test]
    async fn test_complete_sets_full_progress() {
        let store = JobStatusStore::new();
        let run = run_id(&store.try_begin("s1").await.unwrap());
        store.set_total("s1", &run, 3).await.unwrap();

        let status = store.complete("s1", &run).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, 100);
        assert!(status.completed_at.is_some());

        // Terminal runs accept no further updates.
        assert!(store.record_progress("s1", &run, 10, 0, 0).await.is_none());
        assert_eq!(store.get("s1").progress, 100);
    }

    #[tokio::test]
    async fn test_stale_run_updates_are_ignored() {
        let store = JobStatusStore::new();
        let old = run_id(&store.try_begin("s1").await.unwrap());
        store.fail("s1", &old, "boom").await.unwrap();
        let new = run_id(&store.try_begin("s1").await.unwrap());

        assert!(store.complete("s1", &old).await.is_none());
        assert_eq!(store.get("s1").run_id.as_deref(), Some(new.as_str()));
        assert_eq!(store.get("s1").state, JobState::InProgress);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_begin_accepts_exactly_one() {
        let store = Arc::new(JobStatusStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.try_begin("s1").await.is_some() })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_every_change() {
        let store = JobStatusStore::new();
        let mut rx = store.subscribe();

        let run = run_id(&store.try_begin("s1").await.unwrap());
        store.record_progress("s1", &run, 50, 1, 0).await;
        store.complete("s1", &run).await;

        let states: Vec<(JobState, u8)> = (0..3)
            .map(|_| rx.try_recv().unwrap())
            .map(|s| (s.state, s.progress))
            .collect();
        assert_eq!(
            states,
            vec![
                (JobState::InProgress, 0),
                (JobState::InProgress, 50),
                (JobState::Completed, 100),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_completion_racing_new_start_keeps_writes_ordered() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(JobStatusStore::new());
        store.set_database(db.clone());
        let mut rx = store.subscribe();

        for i in 0..200 {
            let subject = format!("s{}", i);
            let old = run_id(&store.try_begin(&subject).await.unwrap());

            let completer = {
                let store = Arc::clone(&store);
                let subject = subject.clone();
                tokio::spawn(async move { store.complete(&subject, &old).await })
            };
            let starter = {
                let store = Arc::clone(&store);
                let subject = subject.clone();
                tokio::spawn(async move {
                    loop {
                        if let Some(status) = store.try_begin(&subject).await {
                            return run_id(&status);
                        }
                        tokio::task::yield_now().await;
                    }
                })
            };
            assert!(completer.await.unwrap().is_some());
            let new = starter.await.unwrap();

            let cached = store.get(&subject);
            assert_eq!(cached.run_id.as_deref(), Some(new.as_str()));
            assert_eq!(cached.state, JobState::InProgress);

            let row = job_repo::find_by_subject(&db, &subject).unwrap().unwrap();
            assert_eq!(row.run_id, new);
            assert_eq!(row.state, "in_progress");

            let mut last = None;
            while let Ok(status) = rx.try_recv() {
                last = Some(status);
            }
            let last = last.unwrap();
            assert_eq!(last.run_id.as_deref(), Some(new.as_str()));
            assert_eq!(last.state, JobState::InProgress);
        }
    }

    #[tokio::test]
    async fn test_statuses_persist_and_reload() {
        let db = Database::open_in_memory().unwrap();
        let store = JobStatusStore::new();
        store.set_database(db.clone());

        let done = run_id(&store.try_begin("s1").await.unwrap());
        store.complete("s1", &done).await;
        let running = run_id(&store.try_begin("s2").await.unwrap());
        store.record_progress("s2", &running, 40, 2, 0).await;

        let reloaded = JobStatusStore::new();
        reloaded.set_database(db.clone());
        assert_eq!(reloaded.load_from_database().unwrap(), 2);

        let s1 = reloaded.get("s1");
        assert_eq!(s1.state, JobState::Completed);
        assert_eq!(s1.run_id.as_deref(), Some(done.as_str()));

        let s2 = reloaded.get("s2");
        assert_eq!(s2.state, JobState::Failed);
        assert_eq!(s2.progress, 40);
        assert_eq!(s2.error.as_deref(), Some(INTERRUPTED_ERROR));

        let row = job_repo::find_by_subject(&db, "s2").unwrap().unwrap();
        assert_eq!(row.state, "failed");
    }

    #[test]
    fn test_load_without_database_is_noop() {
        let store = JobStatusStore::new();
        assert_eq!(store.load_from_database().unwrap(), 0);
    }
}
