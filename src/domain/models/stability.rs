//! Stability state derived from the sample history.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::field::ComponentDeficit;

/// Coarse classification of the stability score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StabilityStatus {
    Stable,
    Watch,
    Breach,
}

impl StabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "STABLE",
            Self::Watch => "WATCH",
            Self::Breach => "BREACH",
        }
    }

    /// Whether this status is WATCH or better.
    pub fn is_recovered(&self) -> bool {
        !matches!(self, Self::Breach)
    }
}

impl fmt::Display for StabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction in which stability is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Improving,
    Steady,
    Declining,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improving => "IMPROVING",
            Self::Steady => "STEADY",
            Self::Declining => "DECLINING",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which trigger put the field into BREACH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachTrigger {
    /// Smoothed score fell below the relative breach threshold
    Threshold,
    /// Latest raw variance exceeded the absolute ceiling
    Ceiling,
    /// Both triggers fired on the same sample
    Both,
}

/// Snapshot of the field's stability.
///
/// Recomputed on every recorded sample and always replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityState {
    /// 1.0 is fully stable
    pub score: f64,
    pub status: StabilityStatus,
    pub trend: Trend,
    /// Severity of the most recent breach, kept after recovery
    pub last_breach_severity: Option<f64>,
    /// Trigger of the breach on this sample, if in BREACH
    pub breach_trigger: Option<BreachTrigger>,
    pub lagging_component: Option<ComponentDeficit>,
    pub latest_variance: Option<f64>,
    /// Samples currently held in history
    pub sample_count: usize,
}

impl StabilityState {
    /// Neutral state used before any sample has been recorded.
    pub fn neutral() -> Self {
        Self {
            score: 0.5,
            status: StabilityStatus::Watch,
            trend: Trend::Steady,
            last_breach_severity: None,
            breach_trigger: None,
            lagging_component: None,
            latest_variance: None,
            sample_count: 0,
        }
    }

    pub fn is_breach(&self) -> bool {
        self.status == StabilityStatus::Breach
    }

    /// Severity of the current breach; `None` outside BREACH.
    pub fn breach_severity(&self) -> Option<f64> {
        if self.is_breach() {
            Some(self.last_breach_severity.unwrap_or(0.0))
        } else {
            None
        }
    }
}

impl Default for StabilityState {
    fn default() -> Self {
        Self::neutral()
    }
}
