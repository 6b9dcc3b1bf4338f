//! Background matching runs.
//!
//! [`MatchingService::start_matching`] claims the subject's slot in the
//! status store and spawns one task that scores every eligible candidate
//! in turn. The status store is the single source of truth for progress.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::ai::{AiProvider, AiScorer, DisabledProvider, GeminiProvider, ScoreOutcome};
use crate::config::{resolve_database_path, Config};
use crate::db::Database;
use crate::error::{LabmatchError, MatchingError};
use crate::profile::{Candidate, ProfileStore, SqliteProfileStore, Subject};
use crate::scoring::heuristic_score;
use crate::secrets::resolve_secret_optional;
use crate::store::{
    JobStatus, JobStatusStore, MatchRecord, MatchStore, MatchUpsert, PersistenceError,
    SqliteMatchStore,
};

/// Per-run options.
#[derive(Debug, Clone, Copy)]
pub struct MatchingOptions {
    /// Ask the AI provider for a score. Ignored when AI is disabled.
    pub use_ai: bool,
}

impl Default for MatchingOptions {
    fn default() -> Self {
        Self { use_ai: true }
    }
}

impl MatchingOptions {
    pub fn heuristic_only() -> Self {
        Self { use_ai: false }
    }
}

/// An accepted run.
#[derive(Debug)]
pub struct MatchingJob {
    /// Status at acceptance: in progress, 0%.
    pub status: JobStatus,
    /// The background task. Await it to wait for the run, or abort it.
    pub handle: JoinHandle<()>,
}

/// Counters from a finished candidate loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RunSummary {
    processed: u32,
    skipped: u32,
}

/// Starts matching runs and answers status and match queries.
#[derive(Clone)]
pub struct MatchingService {
    profiles: Arc<dyn ProfileStore>,
    scorer: AiScorer,
    matches: Arc<dyn MatchStore>,
    statuses: Arc<JobStatusStore>,
    ai_enabled: bool,
}

impl MatchingService {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        scorer: AiScorer,
        matches: Arc<dyn MatchStore>,
        statuses: Arc<JobStatusStore>,
    ) -> Self {
        Self {
            profiles,
            scorer,
            matches,
            statuses,
            ai_enabled: true,
        }
    }

    /// Turns AI scoring off for every run, whatever the run options say.
    pub fn with_ai_enabled(mut self, enabled: bool) -> Self {
        self.ai_enabled = enabled;
        self
    }

    /// Production constructor: opens the configured database and wires the
    /// SQLite stores and the AI provider.
    pub fn from_config(config: &Config) -> Result<Self, LabmatchError> {
        let path = resolve_database_path(config)?;
        let db = Database::open(&path)?;
        Self::with_database(db, config)
    }

    /// Wires the service over an already open database.
    ///
    /// Statuses left over from a previous process are restored; runs that
    /// were still active are marked failed.
    pub fn with_database(db: Database, config: &Config) -> Result<Self, LabmatchError> {
        let statuses = Arc::new(JobStatusStore::new());
        statuses.set_database(db.clone());
        statuses.load_from_database()?;

        let (provider, ai_enabled) = build_provider(config)?;
        let scorer =
            AiScorer::new(provider).with_timeout(Duration::from_secs(config.ai.timeout_secs));

        Ok(Self::new(
            Arc::new(SqliteProfileStore::new(db.clone())),
            scorer,
            Arc::new(SqliteMatchStore::new(db)),
            statuses,
        )
        .with_ai_enabled(ai_enabled))
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai_enabled
    }

    pub fn statuses(&self) -> &Arc<JobStatusStore> {
        &self.statuses
    }

    /// Starts a background matching run for the subject.
    ///
    /// Returns as soon as the run is accepted. Fails without side effects
    /// when the subject is unknown or already has an active run.
    pub async fn start_matching(
        &self,
        subject_id: &str,
        options: MatchingOptions,
    ) -> Result<MatchingJob, MatchingError> {
        self.profiles
            .get_subject(subject_id)
            .await
            .map_err(MatchingError::ProfileStore)?
            .ok_or_else(|| MatchingError::SubjectNotFound {
                subject_id: subject_id.to_string(),
            })?;

        let status = self
            .statuses
            .try_begin(subject_id)
            .await
            .ok_or_else(|| MatchingError::AlreadyRunning {
                subject_id: subject_id.to_string(),
            })?;
        let run_id = status.run_id.clone().unwrap_or_default();
        let use_ai = options.use_ai && self.ai_enabled;

        info!(
            subject_id = %subject_id,
            run_id = %run_id,
            use_ai,
            "Matching run accepted"
        );

        let span = info_span!("matching_job", subject_id = %subject_id, run_id = %run_id);
        let service = self.clone();
        let subject_id = subject_id.to_string();
        let handle = tokio::spawn(
            async move { service.supervise(subject_id, run_id, use_ai).await }.instrument(span),
        );

        Ok(MatchingJob { status, handle })
    }

    /// Latest status for the subject, or the not-found sentinel.
    pub fn get_status(&self, subject_id: &str) -> JobStatus {
        self.statuses.get(subject_id)
    }

    /// Streams every status change.
    pub fn subscribe(&self) -> broadcast::Receiver<JobStatus> {
        self.statuses.subscribe()
    }

    /// The subject's matches, best first.
    pub async fn list_matches(&self, subject_id: &str) -> Result<Vec<MatchRecord>, MatchingError> {
        Ok(self.matches.list_for_subject(subject_id).await?)
    }

    pub async fn get_match(
        &self,
        subject_id: &str,
        candidate_id: &str,
    ) -> Result<Option<MatchRecord>, MatchingError> {
        Ok(self.matches.get(subject_id, candidate_id).await?)
    }

    /// Runs the candidate loop and records the terminal state, whatever happens.
    async fn supervise(self, subject_id: String, run_id: String, use_ai: bool) {
        let outcome = AssertUnwindSafe(self.run(&subject_id, &run_id, use_ai))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(summary)) => {
                self.statuses.complete(&subject_id, &run_id).await;
                info!(
                    processed = summary.processed,
                    skipped = summary.skipped,
                    "Matching run completed"
                );
            }
            Ok(Err(e)) => {
                error!(error = %e, "Matching run failed");
                self.statuses
                    .fail(&subject_id, &run_id, &e.to_string())
                    .await;
            }
            Err(panic) => {
                let message = format!("matching task panicked: {}", panic_message(&*panic));
                error!("{}", message);
                self.statuses.fail(&subject_id, &run_id, &message).await;
            }
        }
    }

    async fn run(
        &self,
        subject_id: &str,
        run_id: &str,
        use_ai: bool,
    ) -> Result<RunSummary, MatchingError> {
        let subject = self
            .profiles
            .get_subject(subject_id)
            .await
            .map_err(MatchingError::ProfileStore)?
            .ok_or_else(|| MatchingError::SubjectNotFound {
                subject_id: subject_id.to_string(),
            })?;

        let candidates = self
            .profiles
            .list_eligible_candidates()
            .await
            .map_err(MatchingError::CandidateListing)?;

        let total = candidates.len();
        self.statuses
            .set_total(subject_id, run_id, u32::try_from(total).unwrap_or(u32::MAX))
            .await;
        if candidates.is_empty() {
            info!("No eligible candidates");
            return Ok(RunSummary::default());
        }

        let mut summary = RunSummary::default();
        for (index, candidate) in candidates.iter().enumerate() {
            let span = info_span!("score_candidate", candidate_id = %candidate.id);
            let result = AssertUnwindSafe(
                self.score_candidate(&subject, candidate, use_ai)
                    .instrument(span),
            )
            .catch_unwind()
            .await;

            match result {
                Ok(Ok(_)) => summary.processed += 1,
                Ok(Err(e)) => {
                    warn!(
                        candidate_id = %candidate.id,
                        error = %e,
                        "Failed to store match, skipping candidate"
                    );
                    summary.skipped += 1;
                }
                Err(panic) => {
                    error!(
                        candidate_id = %candidate.id,
                        panic = %panic_message(&*panic),
                        "Scoring panicked, skipping candidate"
                    );
                    summary.skipped += 1;
                }
            }

            self.statuses
                .record_progress(
                    subject_id,
                    run_id,
                    progress_after(index, total),
                    summary.processed,
                    summary.skipped,
                )
                .await;
        }

        Ok(summary)
    }

    async fn score_candidate(
        &self,
        subject: &Subject,
        candidate: &Candidate,
        use_ai: bool,
    ) -> Result<MatchRecord, PersistenceError> {
        let heuristic = heuristic_score(subject, candidate);
        let outcome = if use_ai {
            self.scorer.score(subject, candidate, &heuristic).await
        } else {
            ScoreOutcome::heuristic(&heuristic)
        };

        let record = self
            .matches
            .upsert(MatchUpsert::from_scoring(
                subject, candidate, &heuristic, &outcome,
            ))
            .await?;

        debug!(
            heuristic_score = record.heuristic_score,
            ai_score = ?record.ai_score,
            source = ?outcome.source,
            "Candidate scored"
        );
        Ok(record)
    }
}

/// Percent done after the candidate at `index` of `total` has been handled.
fn progress_after(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = ((index + 1) * 100 / total).min(100);
    // Lossless after the clamp.
    percent as u8
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Picks the AI provider. Without a resolvable API key, scoring is heuristic-only.
fn build_provider(config: &Config) -> Result<(Arc<dyn AiProvider>, bool), LabmatchError> {
    let ai = &config.ai;
    if !ai.enabled {
        info!("AI scoring disabled by configuration");
        return Ok((Arc::new(DisabledProvider), false));
    }

    let key = resolve_secret_optional(
        ai.api_key.as_deref(),
        ai.api_key_file.as_deref(),
        ai.api_key_env_var.as_deref(),
    )?;
    let Some(key) = key else {
        warn!("No AI API key configured, using heuristic scoring only");
        return Ok((Arc::new(DisabledProvider), false));
    };

    let provider = GeminiProvider::new(
        &ai.endpoint,
        &ai.model,
        key,
        Duration::from_secs(ai.timeout_secs),
    )?;
    info!(model = %ai.model, "AI scoring enabled");
    Ok((Arc::new(provider), true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_after() {
        assert_eq!(progress_after(0, 4), 25);
        assert_eq!(progress_after(3, 4), 100);
        assert_eq!(progress_after(0, 3), 33);
        assert_eq!(progress_after(1, 3), 66);
        assert_eq!(progress_after(2, 3), 100);
        assert_eq!(progress_after(0, 0), 100);
    }

    #[test]
    fn test_progress_is_monotonic_for_odd_totals() {
        for total in 1..=37 {
            let values: Vec<u8> = (0..total).map(|i| progress_after(i, total)).collect();
            assert!(values.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(values.last(), Some(&100));
        }
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*boxed), "static message");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }

    #[test]
    fn test_disabled_config_selects_disabled_provider() {
        let mut config = Config::default();
        config.ai.enabled = false;
        let (provider, enabled) = build_provider(&config).unwrap();
        assert!(!enabled);
        assert_eq!(provider.name(), "disabled");
    }

    #[test]
    fn test_direct_key_selects_gemini() {
        let mut config = Config::default();
        config.ai.api_key = Some("test-key".to_string());
        let (provider, enabled) = build_provider(&config).unwrap();
        assert!(enabled);
        assert_eq!(provider.name(), "gemini");
    }

    #[test]
    fn test_unreadable_key_file_is_error() {
        let mut config = Config::default();
        config.ai.api_key_file = Some("/nonexistent/labmatch/key".to_string());
        assert!(matches!(
            build_provider(&config),
            Err(LabmatchError::Secret(_))
        ));
    }
}
