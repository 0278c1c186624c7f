//! Session metrics and field samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only view of a session's numeric metrics.
///
/// Produced by the external session state provider. Any shape works as long
/// as the values can be addressed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub values: BTreeMap<String, f64>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Finite value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().filter(|v| v.is_finite())
    }

    /// Merge `other` into `self`, overwriting existing names.
    pub fn merge(&mut self, other: &Self) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), *value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A tracked component sitting below its individual target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDeficit {
    pub component: String,
    pub value: f64,
    pub target: f64,
}

impl ComponentDeficit {
    pub fn shortfall(&self) -> f64 {
        (self.target - self.value).max(0.0)
    }
}

/// One measurement of the field at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSample {
    pub timestamp: DateTime<Utc>,
    /// Tick number of the sampling cycle that produced this sample
    pub sequence: u64,
    pub variance: f64,
    pub components: BTreeMap<String, f64>,
    /// Component furthest below its target, if any
    pub lagging: Option<ComponentDeficit>,
    /// Input was absent or partial and defaults were substituted
    pub degraded: bool,
}

impl FieldSample {
    /// Bare sample with the given variance, mostly for feeding a tracker directly.
    pub fn with_variance(timestamp: DateTime<Utc>, sequence: u64, variance: f64) -> Self {
        Self {
            timestamp,
            sequence,
            variance,
            components: BTreeMap::new(),
            lagging: None,
            degraded: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_ignore_non_finite() {
        let metrics = SessionMetrics::new()
            .with("coherence", 0.8)
            .with("broken", f64::NAN);
        assert_eq!(metrics.get("coherence"), Some(0.8));
        assert_eq!(metrics.get("broken"), None);
        assert_eq!(metrics.get("missing"), None);
    }

    #[test]
    fn test_metrics_merge_overwrites() {
        let mut base = SessionMetrics::new().with("a", 1.0).with("b", 2.0);
        base.merge(&SessionMetrics::new().with("b", 3.0).with("c", 4.0));
        assert_eq!(base.get("a"), Some(1.0));
        assert_eq!(base.get("b"), Some(3.0));
        assert_eq!(base.get("c"), Some(4.0));
    }

    #[test]
    fn test_deficit_shortfall_never_negative() {
        let deficit = ComponentDeficit {
            component: "coherence".to_string(),
            value: 0.9,
            target: 0.6,
        };
        assert!(deficit.shortfall().abs() < f64::EPSILON);
    }
}
