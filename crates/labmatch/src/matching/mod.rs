//! Matching job orchestration.

pub mod service;

pub use service::{MatchingJob, MatchingOptions, MatchingService};
