//! Subject and candidate profiles, and the store they are read from.
//!
//! Profiles are owned by an external store; the matching core only reads
//! them, always through an owned snapshot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{profile_repo, Database, DatabaseError};

/// The entity being matched (a student).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub degree_level: String,
    /// Weekly availability. `None` means the student did not say.
    #[serde(default)]
    pub hours_per_week: Option<i32>,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            interests: Vec::new(),
            methods: Vec::new(),
            degree_level: String::new(),
            hours_per_week: None,
        }
    }

    pub fn with_interests<I, S>(mut self, interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interests = interests.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_degree_level(mut self, degree_level: impl Into<String>) -> Self {
        self.degree_level = degree_level.into();
        self
    }

    pub fn with_hours_per_week(mut self, hours: i32) -> Self {
        self.hours_per_week = Some(hours);
        self
    }
}

/// An entity a subject can be matched against (a professor or project).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub areas: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub preferred_degree_levels: Vec<String>,
    /// Only candidates accepting new matches are eligible.
    #[serde(default = "default_accepting")]
    pub accepting_matches: bool,
}

fn default_accepting() -> bool {
    true
}

impl Candidate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            areas: Vec::new(),
            methods: Vec::new(),
            preferred_degree_levels: Vec::new(),
            accepting_matches: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.areas = areas.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_preferred_degree_levels<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_degree_levels = levels.into_iter().map(Into::into).collect();
        self
    }

    pub fn accepting(mut self, accepting: bool) -> Self {
        self.accepting_matches = accepting;
        self
    }
}

/// Errors raised by a profile store.
#[derive(Debug, Error)]
pub enum ProfileStoreError {
    #[error("Profile database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Profile store task failed: {0}")]
    Task(String),

    #[error("Profile store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to the profiles the matching core scores.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Looks up a subject. `Ok(None)` means the subject does not exist.
    async fn get_subject(&self, id: &str) -> Result<Option<Subject>, ProfileStoreError>;

    /// Lists every candidate currently eligible for matching, in a stable order.
    async fn list_eligible_candidates(&self) -> Result<Vec<Candidate>, ProfileStoreError>;
}

/// Profile store backed by the `students` and `candidates` tables.
#[derive(Clone)]
pub struct SqliteProfileStore {
    db: Database,
}

impl SqliteProfileStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or replaces a subject profile.
    pub fn save_subject(&self, subject: &Subject) -> Result<(), DatabaseError> {
        profile_repo::upsert_student(&self.db, subject)
    }

    /// Inserts or replaces a candidate profile.
    pub fn save_candidate(&self, candidate: &Candidate) -> Result<(), DatabaseError> {
        profile_repo::upsert_candidate(&self.db, candidate)
    }
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn get_subject(&self, id: &str) -> Result<Option<Subject>, ProfileStoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || profile_repo::find_student(&db, &id))
            .await
            .map_err(|e| ProfileStoreError::Task(e.to_string()))?
            .map_err(ProfileStoreError::from)
    }

    async fn list_eligible_candidates(&self) -> Result<Vec<Candidate>, ProfileStoreError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || profile_repo::list_accepting_candidates(&db))
            .await
            .map_err(|e| ProfileStoreError::Task(e.to_string()))?
            .map_err(ProfileStoreError::from)
    }
}
