//! Synthetic session profiles used by `run` and `process`.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::models::SessionMetrics;

/// Shape of the simulated session metrics over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// All components comfortably inside their bands
    Steady,
    /// Coherence and coordination erode every tick
    Degrading,
    /// Components swing in and out of their bands
    Oscillating,
    /// Starts far out of band and converges
    Recovering,
    /// Runaway activity well past the breach ceiling
    Overload,
}

impl Profile {
    /// Metrics the session reports at `step`.
    pub fn metrics(self, step: u64) -> SessionMetrics {
        let t = step as f64;
        let (coherence, coordination, activity, processes) = match self {
            Self::Steady => (0.85, 0.8, 0.5, 3.0),
            Self::Degrading => (
                (0.9 - 0.04 * t).max(0.0),
                (0.85 - 0.03 * t).max(0.0),
                (0.5 + 0.02 * t).min(1.0),
                3.0,
            ),
            Self::Oscillating => (
                0.65 + 0.25 * (t * 0.6).sin(),
                0.7 + 0.2 * (t * 0.6).cos(),
                0.5 + 0.3 * (t * 0.3).sin(),
                3.0,
            ),
            Self::Recovering => (
                (0.1 + 0.06 * t).min(0.9),
                (0.2 + 0.05 * t).min(0.85),
                0.5,
                (12.0 - t).max(3.0),
            ),
            Self::Overload => (0.3, 0.2, 0.95, 14.0),
        };

        SessionMetrics::new()
            .with("coherence", coherence)
            .with("coordination_ratio", coordination)
            .with("activity_rate", activity)
            .with("active_processes", processes)
    }
}
