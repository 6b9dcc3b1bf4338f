pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod matching;
pub mod profile;
pub mod scoring;
pub mod secrets;
pub mod store;

pub use ai::{AiProvider, AiScorer, DisabledProvider, GeminiProvider, ProviderError};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{ConfigError, LabmatchError, MatchingError, Result};
pub use logging::init_logging;
pub use matching::{MatchingJob, MatchingOptions, MatchingService};
pub use profile::{Candidate, ProfileStore, ProfileStoreError, SqliteProfileStore, Subject};
pub use scoring::{heuristic_score, HeuristicScore};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use store::{JobState, JobStatus, JobStatusStore, MatchRecord, MatchStore, SqliteMatchStore};
