//! Providers and stores with controllable behaviour.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use labmatch::store::{MatchUpsert, PersistenceError};
use labmatch::{
    AiProvider, Candidate, MatchRecord, MatchStore, ProfileStore, ProfileStoreError,
    ProviderError, SqliteMatchStore, SqliteProfileStore, Subject,
};

// ─── AI providers ───────────────────────────────────────────────────────────

/// Returns the same response for every prompt and counts calls.
pub struct FixedProvider {
    response: String,
    calls: AtomicUsize,
}

impl FixedProvider {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for FixedProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Fails every call as a transport error would.
pub struct FailingProvider;

#[async_trait]
impl AiProvider for FailingProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Request("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Panics when the prompt mentions `marker`, otherwise answers with a score.
pub struct PanickingProvider {
    pub marker: String,
}

#[async_trait]
impl AiProvider for PanickingProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        if prompt.contains(&self.marker) {
            panic!("provider exploded on {}", self.marker);
        }
        Ok(r#"{"overall_score": 50, "reasoning": "ok"}"#.to_string())
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

// ─── Profile stores ─────────────────────────────────────────────────────────

/// Holds candidate listing until permits are released, and counts listings.
pub struct GatedProfileStore {
    pub inner: SqliteProfileStore,
    pub gate: Arc<Semaphore>,
    listings: AtomicUsize,
}

impl GatedProfileStore {
    pub fn new(inner: SqliteProfileStore) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
            listings: AtomicUsize::new(0),
        }
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for GatedProfileStore {
    async fn get_subject(&self, id: &str) -> Result<Option<Subject>, ProfileStoreError> {
        self.inner.get_subject(id).await
    }

    async fn list_eligible_candidates(&self) -> Result<Vec<Candidate>, ProfileStoreError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ProfileStoreError::Unavailable(e.to_string()))?;
        permit.forget();
        self.inner.list_eligible_candidates().await
    }
}

/// Resolves subjects but cannot list candidates.
pub struct BrokenListingStore {
    pub inner: SqliteProfileStore,
}

#[async_trait]
impl ProfileStore for BrokenListingStore {
    async fn get_subject(&self, id: &str) -> Result<Option<Subject>, ProfileStoreError> {
        self.inner.get_subject(id).await
    }

    async fn list_eligible_candidates(&self) -> Result<Vec<Candidate>, ProfileStoreError> {
        Err(ProfileStoreError::Unavailable(
            "profile service offline".to_string(),
        ))
    }
}

/// Finds the subject once, then reports it gone.
pub struct VanishingSubjectStore {
    pub inner: SqliteProfileStore,
    lookups: AtomicUsize,
}

impl VanishingSubjectStore {
    pub fn new(inner: SqliteProfileStore) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProfileStore for VanishingSubjectStore {
    async fn get_subject(&self, id: &str) -> Result<Option<Subject>, ProfileStoreError> {
        if self.lookups.fetch_add(1, Ordering::SeqCst) == 0 {
            self.inner.get_subject(id).await
        } else {
            Ok(None)
        }
    }

    async fn list_eligible_candidates(&self) -> Result<Vec<Candidate>, ProfileStoreError> {
        self.inner.list_eligible_candidates().await
    }
}

// ─── Match stores ───────────────────────────────────────────────────────────

/// Fails writes for the listed candidates and delegates everything else.
pub struct FlakyMatchStore {
    pub inner: SqliteMatchStore,
    pub fail_for: HashSet<String>,
}

#[async_trait]
impl MatchStore for FlakyMatchStore {
    async fn upsert(&self, upsert: MatchUpsert) -> Result<MatchRecord, PersistenceError> {
        if self.fail_for.contains(&upsert.candidate_id) {
            return Err(PersistenceError::Task("disk full".to_string()));
        }
        self.inner.upsert(upsert).await
    }

    async fn get(
        &self,
        subject_id: &str,
        candidate_id: &str,
    ) -> Result<Option<MatchRecord>, PersistenceError> {
        self.inner.get(subject_id, candidate_id).await
    }

    async fn list_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Vec<MatchRecord>, PersistenceError> {
        self.inner.list_for_subject(subject_id).await
    }

    async fn count_for_subject(&self, subject_id: &str) -> Result<u64, PersistenceError> {
        self.inner.count_for_subject(subject_id).await
    }
}
