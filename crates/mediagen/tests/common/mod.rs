//! Shared test utilities for mediagen integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a worker over SQLite and a temp-dir object store
//! - A scripted provider and a recording progress reporter
//! - Builders for jobs and image fixtures

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
