use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;

/// Main configuration structure for fieldguard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Per-session monitoring and optimizer configuration
    #[serde(default)]
    pub field: FieldConfig,

    /// Request pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target band for one tracked component of the session state.
///
/// A value inside `[low, high]` contributes no deviation. `low` doubles as the
/// component's individual target: a value below it marks the component as lagging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ComponentTarget {
    /// Metric name as exposed by the session state provider
    pub name: String,

    /// Lower edge of the target band
    pub low: f64,

    /// Upper edge of the target band
    pub high: f64,

    /// Weight of this component's deviation in the aggregated variance
    #[serde(default = "default_component_weight")]
    pub weight: f64,

    /// Whether a missing value counts as a deviation
    #[serde(default = "default_true")]
    pub required: bool,
}

impl ComponentTarget {
    pub fn new(name: impl Into<String>, low: f64, high: f64, weight: f64) -> Self {
        Self {
            name: name.into(),
            low,
            high,
            weight,
            required: true,
        }
    }

    /// Mark the component as optional; missing values are skipped.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Distance of `value` from the band, zero inside it.
    pub fn deviation(&self, value: f64) -> f64 {
        if value < self.low {
            self.low - value
        } else if value > self.high {
            value - self.high
        } else {
            0.0
        }
    }
}

const fn default_component_weight() -> f64 {
    1.0
}

const fn default_true() -> bool {
    true
}

/// Variance aggregation selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Weighted sum of band deviations
    #[default]
    Weighted,
    /// Root of the weighted sum of squared deviations
    Quadratic,
}

/// Per-session monitor configuration.
///
/// The first six fields are the recognized public options; the remaining ones
/// tune sampling, smoothing and strategy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FieldConfig {
    /// Interval between optimizer ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Capacity of the rolling sample history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Score at or above which the field is STABLE
    #[serde(default = "default_watch_threshold")]
    pub watch_threshold: f64,

    /// Score below which the field is in BREACH
    #[serde(default = "default_breach_threshold")]
    pub breach_threshold: f64,

    /// Raw variance above which the field is in BREACH regardless of score
    #[serde(default = "default_breach_ceiling")]
    pub breach_ceiling: f64,

    /// Consecutive DECLINING ticks before an action is escalated
    #[serde(default = "default_escalation_tick_count")]
    pub escalation_tick_count: u32,

    /// Shortened tick interval used while in BREACH; half the tick interval when unset
    #[serde(default)]
    pub remediation_interval_ms: Option<u64>,

    /// EWMA weight of the newest variance
    #[serde(default = "default_smoothing_alpha")]
    pub smoothing_alpha: f64,

    /// Smoothed variance at which the score reaches 0.5
    #[serde(default = "default_variance_scale")]
    pub variance_scale: f64,

    /// Samples per trend comparison window
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,

    /// Minimum mean-variance change reported as a trend
    #[serde(default = "default_trend_epsilon")]
    pub trend_epsilon: f64,

    /// Variance assigned when the session state is unavailable
    #[serde(default = "default_variance")]
    pub default_variance: f64,

    /// Deviation charged for a missing required component
    #[serde(default = "default_missing_penalty")]
    pub missing_penalty: f64,

    /// How per-component deviations combine into one variance
    #[serde(default)]
    pub aggregation: Aggregation,

    /// Priority added to escalated actions
    #[serde(default = "default_escalation_boost")]
    pub escalation_boost: u8,

    /// Number of issued actions retained for observability
    #[serde(default = "default_action_log_capacity")]
    pub action_log_capacity: usize,

    /// Upper bound of a targeted amplification factor
    #[serde(default = "default_max_amplification")]
    pub max_amplification: f64,

    /// Correction applied at severity 1.0
    #[serde(default = "default_max_correction")]
    pub max_correction: f64,

    /// Fraction by which load reduction relaxes the next breach check
    #[serde(default = "default_tolerance_widening")]
    pub tolerance_widening: f64,

    /// Tracked components and their target bands
    #[serde(default = "default_components")]
    pub components: Vec<ComponentTarget>,
}

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_history_capacity() -> usize {
    75
}

const fn default_watch_threshold() -> f64 {
    0.7
}

const fn default_breach_threshold() -> f64 {
    0.4
}

const fn default_breach_ceiling() -> f64 {
    2.0
}

const fn default_escalation_tick_count() -> u32 {
    3
}

const fn default_smoothing_alpha() -> f64 {
    0.3
}

const fn default_variance_scale() -> f64 {
    1.0
}

const fn default_trend_window() -> usize {
    3
}

const fn default_trend_epsilon() -> f64 {
    0.05
}

const fn default_variance() -> f64 {
    1.0
}

const fn default_missing_penalty() -> f64 {
    0.5
}

const fn default_escalation_boost() -> u8 {
    2
}

const fn default_action_log_capacity() -> usize {
    50
}

const fn default_max_amplification() -> f64 {
    1.5
}

const fn default_max_correction() -> f64 {
    1.0
}

const fn default_tolerance_widening() -> f64 {
    0.1
}

fn default_components() -> Vec<ComponentTarget> {
    vec![
        ComponentTarget::new("coherence", 0.6, 1.0, 1.0),
        ComponentTarget::new("coordination_ratio", 0.5, 1.0, 1.0),
        ComponentTarget::new("activity_rate", 0.2, 0.8, 0.5),
        ComponentTarget::new("active_processes", 1.0, 8.0, 0.25),
        ComponentTarget::new("pipeline_quality", 0.5, 1.0, 0.5).optional(),
        ComponentTarget::new("pipeline_load", 0.0, 0.8, 0.5).optional(),
    ]
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            history_capacity: default_history_capacity(),
            watch_threshold: default_watch_threshold(),
            breach_threshold: default_breach_threshold(),
            breach_ceiling: default_breach_ceiling(),
            escalation_tick_count: default_escalation_tick_count(),
            remediation_interval_ms: None,
            smoothing_alpha: default_smoothing_alpha(),
            variance_scale: default_variance_scale(),
            trend_window: default_trend_window(),
            trend_epsilon: default_trend_epsilon(),
            default_variance: default_variance(),
            missing_penalty: default_missing_penalty(),
            aggregation: Aggregation::default(),
            escalation_boost: default_escalation_boost(),
            action_log_capacity: default_action_log_capacity(),
            max_amplification: default_max_amplification(),
            max_correction: default_max_correction(),
            tolerance_widening: default_tolerance_widening(),
            components: default_components(),
        }
    }
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { name, value })
    }
}

fn check_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn check_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

impl FieldConfig {
    /// Config with a custom tick interval.
    pub fn with_tick_interval(tick_interval_ms: u64) -> Self {
        Self {
            tick_interval_ms,
            ..Default::default()
        }
    }

    /// Effective tick interval while the field is in BREACH.
    pub fn remediation_interval_ms(&self) -> u64 {
        self.remediation_interval_ms
            .unwrap_or(self.tick_interval_ms / 2)
            .max(1)
    }

    /// Validate the configuration. Contradictory thresholds are rejected here
    /// so an optimizer never starts with them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval(self.tick_interval_ms));
        }

        if let Some(interval) = self.remediation_interval_ms {
            if interval == 0 || interval > self.tick_interval_ms {
                return Err(ConfigError::InvalidRemediationInterval(
                    interval,
                    self.tick_interval_ms,
                ));
            }
        }

        if self.history_capacity < 2 {
            return Err(ConfigError::InvalidHistoryCapacity(self.history_capacity));
        }

        check_unit("watch_threshold", self.watch_threshold)?;
        check_unit("breach_threshold", self.breach_threshold)?;
        check_unit("tolerance_widening", self.tolerance_widening)?;

        if self.breach_threshold >= self.watch_threshold {
            return Err(ConfigError::ThresholdOrder {
                breach: self.breach_threshold,
                watch: self.watch_threshold,
            });
        }

        if !check_positive(self.breach_ceiling) {
            return Err(ConfigError::InvalidBreachCeiling(self.breach_ceiling));
        }

        if self.escalation_tick_count == 0 {
            return Err(ConfigError::InvalidEscalationTickCount(self.escalation_tick_count));
        }

        let alpha = self.smoothing_alpha;
        if !(alpha.is_finite() && alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::InvalidSmoothingAlpha(self.smoothing_alpha));
        }

        if !check_positive(self.variance_scale) {
            return Err(ConfigError::InvalidVarianceScale(self.variance_scale));
        }

        if self.trend_window == 0 || self.trend_window * 2 > self.history_capacity {
            return Err(ConfigError::InvalidTrendWindow {
                window: self.trend_window,
                capacity: self.history_capacity,
            });
        }

        if !(self.trend_epsilon.is_finite() && self.trend_epsilon >= 0.0) {
            return Err(ConfigError::InvalidTrendEpsilon(self.trend_epsilon));
        }

        if !(self.max_amplification.is_finite() && self.max_amplification >= 1.0) {
            return Err(ConfigError::InvalidMaxAmplification(self.max_amplification));
        }

        if !check_non_negative(self.max_correction) {
            return Err(ConfigError::InvalidMaxCorrection(self.max_correction));
        }

        if !check_non_negative(self.default_variance) {
            return Err(ConfigError::InvalidDefaultVariance(self.default_variance));
        }

        if !check_non_negative(self.missing_penalty) {
            return Err(ConfigError::InvalidMissingPenalty(self.missing_penalty));
        }

        if self.action_log_capacity == 0 {
            return Err(ConfigError::InvalidActionLogCapacity(self.action_log_capacity));
        }

        for component in &self.components {
            self.validate_component(component)?;
        }

        Ok(())
    }

    fn validate_component(&self, component: &ComponentTarget) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidComponent {
            name: component.name.clone(),
            reason: reason.to_string(),
        };

        if component.name.trim().is_empty() {
            return Err(invalid("name cannot be empty"));
        }
        if !(component.low.is_finite() && component.high.is_finite()) {
            return Err(invalid("band edges must be finite"));
        }
        if component.low > component.high {
            return Err(invalid("low must not exceed high"));
        }
        if !(component.weight.is_finite() && component.weight >= 0.0) {
            return Err(invalid("weight must be non-negative"));
        }
        if self
            .components
            .iter()
            .filter(|c| c.name == component.name)
            .count()
            > 1
        {
            return Err(invalid("declared more than once"));
        }
        Ok(())
    }

    /// Look up a tracked component by name.
    pub fn component(&self, name: &str) -> Option<&ComponentTarget> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Request pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Time budget for one request
    #[serde(default = "default_pipeline_timeout_ms")]
    pub timeout_ms: u64,

    /// Number of results retained for analytics
    #[serde(default = "default_pipeline_history")]
    pub history_capacity: usize,

    /// Telemetry records buffered between optimizer ticks
    #[serde(default = "default_telemetry_buffer")]
    pub telemetry_buffer: usize,
}

const fn default_pipeline_timeout_ms() -> u64 {
    250
}

const fn default_pipeline_history() -> usize {
    100
}

const fn default_telemetry_buffer() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_pipeline_timeout_ms(),
            history_capacity: default_pipeline_history(),
            telemetry_buffer: default_telemetry_buffer(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidPipelineTimeout(self.timeout_ms));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidPipelineHistory(self.history_capacity));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}
