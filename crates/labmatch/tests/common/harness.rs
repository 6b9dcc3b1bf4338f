//! Isolated matching environment over an in-memory database.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use labmatch::{
    AiProvider, AiScorer, Candidate, Database, JobStatus, JobStatusStore, MatchStore,
    MatchingOptions, MatchingService, ProfileStore, SqliteMatchStore, SqliteProfileStore, Subject,
};

/// AI timeout used by harness services.
pub const TEST_AI_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestHarness {
    pub db: Database,
    pub profiles: SqliteProfileStore,
    pub matches: SqliteMatchStore,
    pub statuses: Arc<JobStatusStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let statuses = Arc::new(JobStatusStore::new());
        statuses.set_database(db.clone());
        Self {
            profiles: SqliteProfileStore::new(db.clone()),
            matches: SqliteMatchStore::new(db.clone()),
            statuses,
            db,
        }
    }

    pub fn add_subject(&self, subject: &Subject) {
        self.profiles
            .save_subject(subject)
            .expect("Failed to save subject");
    }

    pub fn add_candidate(&self, candidate: &Candidate) {
        self.profiles
            .save_candidate(candidate)
            .expect("Failed to save candidate");
    }

    /// Service over the harness stores with the given provider.
    pub fn service(&self, provider: Arc<dyn AiProvider>) -> MatchingService {
        self.service_with(
            Arc::new(self.profiles.clone()),
            Arc::new(self.matches.clone()),
            provider,
        )
    }

    /// Service with replacement stores, sharing the harness status store.
    pub fn service_with(
        &self,
        profiles: Arc<dyn ProfileStore>,
        matches: Arc<dyn MatchStore>,
        provider: Arc<dyn AiProvider>,
    ) -> MatchingService {
        MatchingService::new(
            profiles,
            AiScorer::new(provider).with_timeout(TEST_AI_TIMEOUT),
            matches,
            Arc::clone(&self.statuses),
        )
    }
}

/// Starts a run, waits for its task, and returns the final status.
pub async fn run_to_completion(
    service: &MatchingService,
    subject_id: &str,
    options: MatchingOptions,
) -> JobStatus {
    let job = service
        .start_matching(subject_id, options)
        .await
        .expect("run should be accepted");
    job.handle.await.expect("matching task should not panic");
    service.get_status(subject_id)
}
