//! Shared test utilities for peanut integration tests.
//!
//! This module provides:
//! - `FakeSource`, `GatedEngine` and `RecordingMetrics` for driving the loop
//! - Builders for manifests and throwaway git repositories

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
