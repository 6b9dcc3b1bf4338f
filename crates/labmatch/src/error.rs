use std::path::PathBuf;
use thiserror::Error;

use crate::profile::ProfileStoreError;
use crate::store::PersistenceError;

#[derive(Error, Debug)]
pub enum LabmatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Matching error: {0}")]
    Matching(#[from] MatchingError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("AI provider error: {0}")]
    Provider(#[from] crate::ai::ProviderError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors returned by matching operations. Only these reach a job's
/// terminal status; per-candidate problems never do.
#[derive(Error, Debug)]
pub enum MatchingError {
    #[error("Matching is already running for subject '{subject_id}'")]
    AlreadyRunning { subject_id: String },

    #[error("Subject '{subject_id}' not found")]
    SubjectNotFound { subject_id: String },

    #[error("Failed to list eligible candidates: {0}")]
    CandidateListing(#[source] ProfileStoreError),

    #[error("Profile lookup failed: {0}")]
    ProfileStore(#[source] ProfileStoreError),

    #[error("Failed to read matches: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, LabmatchError>;
