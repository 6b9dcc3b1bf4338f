//! Shared test utilities for labmatch integration tests.
//!
//! - `TestHarness` wires a matching service over an in-memory database
//! - `fakes` holds providers and stores with injectable failures
//! - `builders` creates the profiles most tests score

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::{run_to_completion, TestHarness};
