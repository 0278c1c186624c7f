//! Processing strategies and the optimization actions that carry them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::stability::StabilityState;

/// Response selected for a given stability state.
///
/// The set is closed; every consumer matches it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// No special handling.
    StandardPass,
    /// Shed optional work and widen tolerance before the next breach check.
    LoadReduction {
        skip_enrichment: bool,
        tolerance_widening: f64,
    },
    /// Reinforce a single lagging component.
    TargetedAmplification { component: String, amplification: f64 },
    /// Corrective adjustment proportional to the breach severity.
    Remediation { severity: f64, correction: f64 },
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::StandardPass => StrategyKind::StandardPass,
            Self::LoadReduction { .. } => StrategyKind::LoadReduction,
            Self::TargetedAmplification { .. } => StrategyKind::TargetedAmplification,
            Self::Remediation { .. } => StrategyKind::Remediation,
        }
    }
}

/// Payload-free discriminant of [`Strategy`], used for counting and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    StandardPass,
    LoadReduction,
    TargetedAmplification,
    Remediation,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StandardPass => "standard_pass",
            Self::LoadReduction => "load_reduction",
            Self::TargetedAmplification => "targeted_amplification",
            Self::Remediation => "remediation",
        }
    }

    /// Base priority of actions carrying this strategy (0-10).
    pub fn base_priority(&self) -> u8 {
        match self {
            Self::StandardPass => 1,
            Self::TargetedAmplification => 4,
            Self::LoadReduction => 5,
            Self::Remediation => 7,
        }
    }

    /// Base confidence of the selector in this strategy.
    pub fn base_confidence(&self) -> f64 {
        match self {
            Self::StandardPass => 0.9,
            Self::LoadReduction => 0.7,
            Self::TargetedAmplification => 0.6,
            Self::Remediation => 0.8,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Highest priority an action can carry.
pub const MAX_PRIORITY: u8 = 10;

/// An action published by the background optimizer.
///
/// Superseded, never mutated, by the next tick's action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationAction {
    pub id: Uuid,
    /// Tick that produced the action; 0 for the default action
    pub tick: u64,
    pub strategy: Strategy,
    /// 0-10, higher is more urgent
    pub priority: u8,
    pub confidence: f64,
    pub issued_at: DateTime<Utc>,
    /// State the action was derived from
    pub stability: StabilityState,
    /// Priority was boosted after sustained decline
    pub escalated: bool,
}

impl OptimizationAction {
    /// Action returned before the first tick has been published.
    pub fn initial() -> Self {
        Self {
            id: Uuid::nil(),
            tick: 0,
            strategy: Strategy::StandardPass,
            priority: StrategyKind::StandardPass.base_priority(),
            confidence: 0.0,
            issued_at: Utc::now(),
            stability: StabilityState::neutral(),
            escalated: false,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.tick == 0
    }
}

impl Default for OptimizationAction {
    fn default() -> Self {
        Self::initial()
    }
}
