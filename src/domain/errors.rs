//! Domain errors for the fieldguard monitor.

use thiserror::Error;
use uuid::Uuid;

/// Configuration errors.
///
/// Only raised while validating configuration at startup. A session whose
/// configuration fails validation never gets an optimizer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid tick_interval_ms: {0}. Must be at least 1")]
    InvalidTickInterval(u64),

    #[error("Invalid remediation_interval_ms: {0}. Must be between 1 and tick_interval_ms ({1})")]
    InvalidRemediationInterval(u64, u64),

    #[error("Invalid history_capacity: {0}. Must be at least 2")]
    InvalidHistoryCapacity(usize),

    #[error("Invalid {name}: {value}. Must be within [0, 1]")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("Contradictory thresholds: breach ({breach}) must be below watch ({watch})")]
    ThresholdOrder { breach: f64, watch: f64 },

    #[error("Invalid breach_ceiling: {0}. Must be positive and finite")]
    InvalidBreachCeiling(f64),

    #[error("Invalid escalation_tick_count: {0}. Must be at least 1")]
    InvalidEscalationTickCount(u32),

    #[error("Invalid smoothing_alpha: {0}. Must be within (0, 1]")]
    InvalidSmoothingAlpha(f64),

    #[error("Invalid variance_scale: {0}. Must be positive and finite")]
    InvalidVarianceScale(f64),

    #[error(
        "Invalid trend_window: {window}. Two windows must fit in history_capacity ({capacity})"
    )]
    InvalidTrendWindow { window: usize, capacity: usize },

    #[error("Invalid trend_epsilon: {0}. Must be non-negative and finite")]
    InvalidTrendEpsilon(f64),

    #[error("Invalid max_amplification: {0}. Must be finite and at least 1")]
    InvalidMaxAmplification(f64),

    #[error("Invalid max_correction: {0}. Must be non-negative and finite")]
    InvalidMaxCorrection(f64),

    #[error("Invalid default_variance: {0}. Must be non-negative and finite")]
    InvalidDefaultVariance(f64),

    #[error("Invalid missing_penalty: {0}. Must be non-negative and finite")]
    InvalidMissingPenalty(f64),

    #[error("Invalid action_log_capacity: {0}. Must be at least 1")]
    InvalidActionLogCapacity(usize),

    #[error("Invalid component '{name}': {reason}")]
    InvalidComponent { name: String, reason: String },

    #[error("Invalid pipeline timeout_ms: {0}. Must be at least 1")]
    InvalidPipelineTimeout(u64),

    #[error("Invalid pipeline history_capacity: {0}. Must be at least 1")]
    InvalidPipelineHistory(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Domain-level errors.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Optimizer already running for session {0}")]
    OptimizerAlreadyRunning(Uuid),

    #[error("Field processor unavailable: {0}")]
    FieldProcessorUnavailable(String),

    #[error("Reinforcement failed for component '{component}': {reason}")]
    ReinforcementFailed { component: String, reason: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
}

pub type DomainResult<T> = Result<T, DomainError>;
