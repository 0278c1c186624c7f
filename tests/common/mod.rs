//! Common test utilities for integration tests
//!
//! Provides shared fixtures and helpers used across multiple integration
//! test files.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use fieldguard::domain::models::{FieldSample, SessionMetrics};

/// Metrics with every required component inside its band.
pub fn stable_metrics() -> SessionMetrics {
    SessionMetrics::new()
        .with("coherence", 0.9)
        .with("coordination_ratio", 0.85)
        .with("activity_rate", 0.5)
        .with("active_processes", 3.0)
}

/// Metrics whose variance is far past the default breach ceiling.
pub fn breaching_metrics() -> SessionMetrics {
    SessionMetrics::new()
        .with("coherence", 0.1)
        .with("coordination_ratio", 0.1)
        .with("activity_rate", 0.99)
        .with("active_processes", 20.0)
}

/// Evenly spaced samples carrying the given variances, oldest first.
pub fn samples(variances: &[f64]) -> Vec<FieldSample> {
    let start = Utc::now();
    variances
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let at = start + Duration::milliseconds(i as i64 * 50);
            FieldSample::with_variance(at, i as u64 + 1, *v)
        })
        .collect()
}

/// Setup test logging
///
/// Initializes a tracing subscriber that writes through the test harness.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
