//! Field sampler.
//!
//! Turns a read-only view of session metrics into a [`FieldSample`]. Sampling
//! is pure and total: absent or partial input produces a degraded sample
//! instead of an error.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::models::{
    Aggregation, ComponentDeficit, ComponentTarget, FieldConfig, FieldSample, SessionMetrics,
};

/// One component's contribution to the aggregated variance.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDeviation {
    pub name: String,
    pub weight: f64,
    pub deviation: f64,
}

/// Combines per-component deviations into one variance number.
///
/// Implementations must be monotonic in each deviation and return a finite,
/// non-negative value for finite non-negative input.
pub trait VarianceAggregator: Send + Sync + fmt::Debug {
    fn aggregate(&self, deviations: &[ComponentDeviation]) -> f64;
}

/// Weighted sum of band deviations.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedDeviation;

impl VarianceAggregator for WeightedDeviation {
    fn aggregate(&self, deviations: &[ComponentDeviation]) -> f64 {
        deviations.iter().map(|d| d.weight * d.deviation).sum()
    }
}

/// Root of the weighted sum of squared deviations; punishes single large
/// excursions harder than [`WeightedDeviation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadraticDeviation;

impl VarianceAggregator for QuadraticDeviation {
    fn aggregate(&self, deviations: &[ComponentDeviation]) -> f64 {
        deviations
            .iter()
            .map(|d| d.weight * d.deviation * d.deviation)
            .sum::<f64>()
            .sqrt()
    }
}

/// Stateless sampler configured with component target bands.
#[derive(Debug, Clone)]
pub struct FieldSampler {
    targets: Vec<ComponentTarget>,
    default_variance: f64,
    missing_penalty: f64,
    aggregator: Arc<dyn VarianceAggregator>,
}

impl FieldSampler {
    pub fn new(config: &FieldConfig) -> Self {
        let aggregator: Arc<dyn VarianceAggregator> = match config.aggregation {
            Aggregation::Weighted => Arc::new(WeightedDeviation),
            Aggregation::Quadratic => Arc::new(QuadraticDeviation),
        };
        Self {
            targets: config.components.clone(),
            default_variance: config.default_variance,
            missing_penalty: config.missing_penalty,
            aggregator,
        }
    }

    /// Replace the variance aggregation function.
    pub fn with_aggregator(mut self, aggregator: Arc<dyn VarianceAggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn targets(&self) -> &[ComponentTarget] {
        &self.targets
    }

    /// Sample the field from `metrics`.
    pub fn sample(
        &self,
        metrics: Option<&SessionMetrics>,
        sequence: u64,
        timestamp: DateTime<Utc>,
    ) -> FieldSample {
        let Some(metrics) = metrics.filter(|m| !m.is_empty()) else {
            return self.default_sample(sequence, timestamp);
        };

        let mut components = BTreeMap::new();
        let mut deviations = Vec::with_capacity(self.targets.len());
        let mut lagging: Option<(f64, ComponentDeficit)> = None;
        let mut degraded = false;

        for target in &self.targets {
            let Some(value) = metrics.get(&target.name) else {
                if target.required {
                    degraded = true;
                    deviations.push(ComponentDeviation {
                        name: target.name.clone(),
                        weight: target.weight,
                        deviation: self.missing_penalty,
                    });
                }
                continue;
            };

            components.insert(target.name.clone(), value);
            deviations.push(ComponentDeviation {
                name: target.name.clone(),
                weight: target.weight,
                deviation: target.deviation(value),
            });

            if value < target.low && target.weight > 0.0 {
                let weighted = (target.low - value) * target.weight;
                if lagging.as_ref().map_or(true, |(w, _)| weighted > *w) {
                    lagging = Some((
                        weighted,
                        ComponentDeficit {
                            component: target.name.clone(),
                            value,
                            target: target.low,
                        },
                    ));
                }
            }
        }

        let variance = self.aggregator.aggregate(&deviations);
        if !(variance.is_finite() && variance >= 0.0) {
            tracing::warn!(variance, sequence, "aggregator produced an invalid variance");
            return self.default_sample(sequence, timestamp);
        }

        FieldSample {
            timestamp,
            sequence,
            variance,
            components,
            lagging: lagging.map(|(_, deficit)| deficit),
            degraded,
        }
    }

    fn default_sample(&self, sequence: u64, timestamp: DateTime<Utc>) -> FieldSample {
        FieldSample {
            timestamp,
            sequence,
            variance: self.default_variance,
            components: BTreeMap::new(),
            lagging: None,
            degraded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler() -> FieldSampler {
        let config = FieldConfig {
            components: vec![
                ComponentTarget::new("coherence", 0.6, 1.0, 1.0),
                ComponentTarget::new("activity_rate", 0.2, 0.8, 0.5),
                ComponentTarget::new("pipeline_quality", 0.5, 1.0, 0.5).optional(),
            ],
            ..Default::default()
        };
        FieldSampler::new(&config)
    }

    #[test]
    fn test_in_band_metrics_have_zero_variance() {
        let metrics = SessionMetrics::new()
            .with("coherence", 0.8)
            .with("activity_rate", 0.5);
        let sample = sampler().sample(Some(&metrics), 1, Utc::now());
        assert!(sample.variance.abs() < f64::EPSILON);
        assert!(!sample.degraded);
        assert!(sample.lagging.is_none());
        assert_eq!(sample.components.len(), 2);
    }

    #[test]
    fn test_variance_is_weighted_sum_of_deviations() {
        let metrics = SessionMetrics::new()
            .with("coherence", 0.4)
            .with("activity_rate", 1.0);
        let sample = sampler().sample(Some(&metrics), 1, Utc::now());
        // 1.0 * 0.2 + 0.5 * 0.2
        assert!((sample.variance - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_absent_state_yields_default_sample() {
        let sample = sampler().sample(None, 7, Utc::now());
        assert!(sample.degraded);
        assert_eq!(sample.sequence, 7);
        assert!((sample.variance - FieldConfig::default().default_variance).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_state_yields_default_sample() {
        let sample = sampler().sample(Some(&SessionMetrics::new()), 1, Utc::now());
        assert!(sample.degraded);
    }

    #[test]
    fn test_missing_required_component_is_penalized() {
        let metrics = SessionMetrics::new().with("coherence", 0.8);
        let sample = sampler().sample(Some(&metrics), 1, Utc::now());
        assert!(sample.degraded);
        // activity_rate missing: 0.5 weight * 0.5 penalty
        assert!((sample.variance - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_missing_optional_component_is_skipped() {
        let metrics = SessionMetrics::new()
            .with("coherence", 0.8)
            .with("activity_rate", 0.5);
        let sample = sampler().sample(Some(&metrics), 1, Utc::now());
        assert!(!sample.degraded);
        assert!(!sample.components.contains_key("pipeline_quality"));
    }

    #[test]
    fn test_non_finite_value_treated_as_missing() {
        let metrics = SessionMetrics::new()
            .with("coherence", f64::INFINITY)
            .with("activity_rate", 0.5);
        let sample = sampler().sample(Some(&metrics), 1, Utc::now());
        assert!(sample.degraded);
        assert!(sample.variance.is_finite());
    }

    #[test]
    fn test_lagging_component_is_largest_weighted_shortfall() {
        let metrics = SessionMetrics::new()
            .with("coherence", 0.3)
            .with("activity_rate", 0.1);
        let sample = sampler().sample(Some(&metrics), 1, Utc::now());
        // coherence: 0.3 * 1.0, activity_rate: 0.1 * 0.5
        let lagging = sample.lagging.expect("a component is below target");
        assert_eq!(lagging.component, "coherence");

        let metrics = SessionMetrics::new()
            .with("coherence", 0.55)
            .with("activity_rate", 0.0);
        let sample = sampler().sample(Some(&metrics), 2, Utc::now());
        assert_eq!(sample.lagging.unwrap().component, "activity_rate");
    }

    #[test]
    fn test_quadratic_aggregator_is_pluggable() {
        let metrics = SessionMetrics::new()
            .with("coherence", 0.2)
            .with("activity_rate", 0.5);
        let sample = sampler()
            .with_aggregator(Arc::new(QuadraticDeviation))
            .sample(Some(&metrics), 1, Utc::now());
        assert!((sample.variance - 0.4).abs() < 1e-9);
    }
}
