//! Stability tracker.
//!
//! Keeps a bounded rolling history of field samples and derives a smoothed
//! stability score, a status with two independent breach triggers, and a
//! trend. The tracker never fails: with no history it reports the neutral
//! state, and unusable samples are skipped.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::domain::models::{
    BreachTrigger, FieldConfig, FieldSample, StabilityState, StabilityStatus, Trend,
};

/// Smoothing applied to the variance series before it is mapped to a score.
pub trait ScoreSmoother: Send + Sync + fmt::Debug {
    /// Fold `variance` into the smoothed value; `previous` is `None` for the
    /// first sample after a reset.
    fn smooth(&self, previous: Option<f64>, variance: f64) -> f64;
}

/// Exponentially weighted moving average.
#[derive(Debug, Clone, Copy)]
pub struct Ewma {
    alpha: f64,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
        }
    }
}

impl ScoreSmoother for Ewma {
    fn smooth(&self, previous: Option<f64>, variance: f64) -> f64 {
        match previous {
            Some(prev) => self.alpha * variance + (1.0 - self.alpha) * prev,
            None => variance,
        }
    }
}

/// Summary of the samples currently held in history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    pub count: usize,
    pub mean_variance: f64,
    pub min_variance: f64,
    pub max_variance: f64,
    pub degraded_samples: usize,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

/// Rolling stability tracker owned by a single optimizer.
#[derive(Debug)]
pub struct StabilityTracker {
    history: VecDeque<FieldSample>,
    capacity: usize,
    smoother: Arc<dyn ScoreSmoother>,
    smoothed: Option<f64>,
    watch_threshold: f64,
    breach_threshold: f64,
    breach_ceiling: f64,
    variance_scale: f64,
    trend_window: usize,
    trend_epsilon: f64,
    relaxation: Option<f64>,
    last_breach_severity: Option<f64>,
    current: StabilityState,
}

impl StabilityTracker {
    pub fn new(config: &FieldConfig) -> Self {
        let capacity = config.history_capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            smoother: Arc::new(Ewma::new(config.smoothing_alpha)),
            smoothed: None,
            watch_threshold: config.watch_threshold,
            breach_threshold: config.breach_threshold,
            breach_ceiling: config.breach_ceiling,
            variance_scale: config.variance_scale,
            trend_window: config.trend_window.max(1),
            trend_epsilon: config.trend_epsilon,
            relaxation: None,
            last_breach_severity: None,
            current: StabilityState::neutral(),
        }
    }

    /// Replace the smoothing function. Clears the smoothed value.
    pub fn with_smoother(mut self, smoother: Arc<dyn ScoreSmoother>) -> Self {
        self.smoother = smoother;
        self.smoothed = None;
        self
    }

    /// Record a sample and return the recomputed state.
    ///
    /// Ordering follows the sample sequence; the timestamp only breaks ties
    /// between equal sequences. Samples behind the newest recorded one are
    /// ignored so the history stays ordered. NaN variances are ignored as well.
    pub fn record(&mut self, mut sample: FieldSample) -> StabilityState {
        if sample.variance.is_nan() {
            tracing::warn!(sequence = sample.sequence, "ignoring sample with NaN variance");
            return self.current.clone();
        }
        if sample.variance.is_infinite() || sample.variance < 0.0 {
            sample.variance = if sample.variance < 0.0 { 0.0 } else { self.breach_ceiling * 2.0 };
        }

        if let Some(last) = self.history.back() {
            let stale = sample.sequence < last.sequence
                || (sample.sequence == last.sequence && sample.timestamp < last.timestamp);
            if stale {
                tracing::warn!(
                    sequence = sample.sequence,
                    last_sequence = last.sequence,
                    "ignoring out-of-order sample"
                );
                return self.current.clone();
            }
        }

        let variance = sample.variance;
        let lagging = sample.lagging.clone();

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);

        let smoothed = self.smoother.smooth(self.smoothed, variance);
        self.smoothed = Some(smoothed);
        let score = self.score_for(smoothed);

        let relaxation = self.relaxation.take().unwrap_or(0.0);
        let breach_threshold = self.breach_threshold * (1.0 - relaxation);

        let below_threshold = score < breach_threshold;
        let above_ceiling = variance > self.breach_ceiling;

        let breach_trigger = match (below_threshold, above_ceiling) {
            (true, true) => Some(BreachTrigger::Both),
            (true, false) => Some(BreachTrigger::Threshold),
            (false, true) => Some(BreachTrigger::Ceiling),
            (false, false) => None,
        };

        let status = if breach_trigger.is_some() {
            StabilityStatus::Breach
        } else if score >= self.watch_threshold {
            StabilityStatus::Stable
        } else {
            StabilityStatus::Watch
        };

        if breach_trigger.is_some() {
            let threshold_severity = if below_threshold && breach_threshold > 0.0 {
                ((breach_threshold - score) / breach_threshold).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let ceiling_severity = if above_ceiling {
                ((variance - self.breach_ceiling) / self.breach_ceiling).clamp(0.0, 1.0)
            } else {
                0.0
            };
            self.last_breach_severity = Some(threshold_severity.max(ceiling_severity));
        }

        self.current = StabilityState {
            score,
            status,
            trend: self.trend(),
            last_breach_severity: self.last_breach_severity,
            breach_trigger,
            lagging_component: lagging,
            latest_variance: Some(variance),
            sample_count: self.history.len(),
        };
        self.current.clone()
    }

    /// Lower the relative breach threshold by `widening` (a fraction) for the
    /// next recorded sample only. The absolute ceiling is unaffected.
    pub fn relax_threshold(&mut self, widening: f64) {
        self.relaxation = Some(widening.clamp(0.0, 1.0));
    }

    /// Latest computed state, neutral before the first sample.
    pub fn current(&self) -> &StabilityState {
        &self.current
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence numbers of the samples in history, oldest first.
    pub fn sequences(&self) -> Vec<u64> {
        self.history.iter().map(|s| s.sequence).collect()
    }

    /// Timestamps of the samples in history, oldest first.
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.history.iter().map(|s| s.timestamp).collect()
    }

    /// Variances of the samples in history, oldest first.
    pub fn variances(&self) -> Vec<f64> {
        self.history.iter().map(|s| s.variance).collect()
    }

    pub fn summary(&self) -> HistorySummary {
        let count = self.history.len();
        if count == 0 {
            return HistorySummary {
                count: 0,
                mean_variance: 0.0,
                min_variance: 0.0,
                max_variance: 0.0,
                degraded_samples: 0,
                first_at: None,
                last_at: None,
            };
        }

        let (sum, min, max) = self.history.iter().fold(
            (0.0, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), s| (sum + s.variance, min.min(s.variance), max.max(s.variance)),
        );

        HistorySummary {
            count,
            mean_variance: sum / count as f64,
            min_variance: min,
            max_variance: max,
            degraded_samples: self.history.iter().filter(|s| s.degraded).count(),
            first_at: self.history.front().map(|s| s.timestamp),
            last_at: self.history.back().map(|s| s.timestamp),
        }
    }

    /// Drop all history and return to the neutral state.
    pub fn reset(&mut self) {
        self.history.clear();
        self.smoothed = None;
        self.relaxation = None;
        self.last_breach_severity = None;
        self.current = StabilityState::neutral();
    }

    fn score_for(&self, smoothed: f64) -> f64 {
        (1.0 / (1.0 + smoothed.max(0.0) / self.variance_scale)).clamp(0.0, 1.0)
    }

    /// Compare the mean variance of the newest window with the one before it.
    /// Windows shrink to half the history while it is short.
    fn trend(&self) -> Trend {
        let n = self.history.len();
        let k = self.trend_window.min(n / 2);
        if k == 0 {
            return Trend::Steady;
        }

        let mean = |skip: usize| -> f64 {
            self.history.iter().skip(skip).take(k).map(|s| s.variance).sum::<f64>() / k as f64
        };
        let recent = mean(n - k);
        let previous = mean(n - 2 * k);
        let delta = recent - previous;

        if delta > self.trend_epsilon {
            Trend::Declining
        } else if delta < -self.trend_epsilon {
            Trend::Improving
        } else {
            Trend::Steady
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn samples(variances: &[f64]) -> Vec<FieldSample> {
        let start = Utc::now();
        variances
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let at = start + Duration::milliseconds(i as i64 * 100);
                FieldSample::with_variance(at, i as u64 + 1, *v)
            })
            .collect()
    }

    fn record_all(tracker: &mut StabilityTracker, variances: &[f64]) -> Vec<StabilityState> {
        samples(variances).into_iter().map(|s| tracker.record(s)).collect()
    }

    #[test]
    fn test_empty_tracker_is_neutral() {
        let tracker = StabilityTracker::new(&FieldConfig::default());
        assert_eq!(tracker.current(), &StabilityState::neutral());
        assert!(tracker.is_empty());
        assert_eq!(tracker.summary().count, 0);
    }

    #[test]
    fn test_zero_variance_is_fully_stable() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        let states = record_all(&mut tracker, &[0.0, 0.0]);
        let last = states.last().unwrap();
        assert!((last.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(last.status, StabilityStatus::Stable);
        assert_eq!(last.trend, Trend::Steady);
    }

    #[test]
    fn test_history_is_bounded() {
        let config = FieldConfig {
            history_capacity: 5,
            trend_window: 2,
            ..Default::default()
        };
        let mut tracker = StabilityTracker::new(&config);
        record_all(&mut tracker, &[0.1; 12]);
        assert_eq!(tracker.len(), 5);
        assert_eq!(tracker.sequences(), vec![8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_ceiling_breach_fires_regardless_of_score() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        record_all(&mut tracker, &[0.0; 10]);
        let state = tracker.record(FieldSample::with_variance(
            Utc::now() + Duration::seconds(5),
            11,
            2.5,
        ));
        assert_eq!(state.status, StabilityStatus::Breach);
        assert_eq!(state.breach_trigger, Some(BreachTrigger::Ceiling));
        assert!((state.last_breach_severity.unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_breach_without_ceiling() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        // 1 / (1 + 1.8) < 0.4 while 1.8 stays under the 2.0 ceiling
        let state = record_all(&mut tracker, &[1.8]).pop().unwrap();
        assert_eq!(state.status, StabilityStatus::Breach);
        assert_eq!(state.breach_trigger, Some(BreachTrigger::Threshold));
        let severity = state.last_breach_severity.unwrap();
        assert!(severity > 0.0 && severity < 1.0);
    }

    #[test]
    fn test_both_triggers_take_highest_severity() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        let state = record_all(&mut tracker, &[5.0]).pop().unwrap();
        assert_eq!(state.breach_trigger, Some(BreachTrigger::Both));
        // ceiling severity (5 - 2) / 2 clips to 1.0
        assert!((state.last_breach_severity.unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_watch_band() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        // score 1 / (1 + 1.0) = 0.5
        let state = record_all(&mut tracker, &[1.0]).pop().unwrap();
        assert_eq!(state.status, StabilityStatus::Watch);
        assert!(state.breach_trigger.is_none());
    }

    #[test]
    fn test_rising_variance_is_declining() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        let state = record_all(&mut tracker, &[0.1, 0.1, 0.1, 0.4, 0.5, 0.6])
            .pop()
            .unwrap();
        assert_eq!(state.trend, Trend::Declining);
    }

    #[test]
    fn test_falling_variance_is_improving() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        let state = record_all(&mut tracker, &[0.9, 0.8, 0.7, 0.4, 0.3, 0.2])
            .pop()
            .unwrap();
        assert_eq!(state.trend, Trend::Improving);
    }

    #[test]
    fn test_small_changes_are_steady() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        let state = record_all(&mut tracker, &[0.30, 0.31, 0.30, 0.32, 0.31, 0.30])
            .pop()
            .unwrap();
        assert_eq!(state.trend, Trend::Steady);
    }

    #[test]
    fn test_out_of_order_sample_ignored() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        let now = Utc::now();
        tracker.record(FieldSample::with_variance(now, 2, 0.2));
        let before = tracker.current().clone();

        let state = tracker.record(FieldSample::with_variance(now + Duration::seconds(1), 1, 3.0));
        assert_eq!(state, before);
        let state = tracker.record(FieldSample::with_variance(now - Duration::seconds(1), 2, 3.0));
        assert_eq!(state, before);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_wall_clock_stepping_back_keeps_recording() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        let now = Utc::now();
        tracker.record(FieldSample::with_variance(now, 1, 0.1));

        let rewound = now - Duration::seconds(60);
        let mut state = tracker.current().clone();
        for seq in 2..=10u64 {
            let at = rewound + Duration::milliseconds(seq as i64 * 100);
            state = tracker.record(FieldSample::with_variance(at, seq, 3.0));
            assert_eq!(state.status, StabilityStatus::Breach, "sequence {seq}");
        }

        assert_eq!(tracker.len(), 10);
        assert_eq!(state.latest_variance, Some(3.0));
        assert_eq!(tracker.sequences(), (1..=10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_nan_variance_ignored() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        let state = tracker.record(FieldSample::with_variance(Utc::now(), 1, f64::NAN));
        assert_eq!(state, StabilityState::neutral());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_relaxation_applies_to_next_record_only() {
        let config = FieldConfig::default();
        let mut tracker = StabilityTracker::new(&config);
        let start = Utc::now();

        // score 1 / 2.6 ~= 0.385: below 0.4 but above 0.4 * 0.9 = 0.36
        tracker.relax_threshold(0.1);
        let relaxed = tracker.record(FieldSample::with_variance(start, 1, 1.6));
        assert_eq!(relaxed.status, StabilityStatus::Watch);

        let strict = tracker.record(FieldSample::with_variance(
            start + Duration::milliseconds(100),
            2,
            1.6,
        ));
        assert_eq!(strict.status, StabilityStatus::Breach);
    }

    #[test]
    fn test_relaxation_does_not_mask_ceiling() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        tracker.relax_threshold(1.0);
        let state = tracker.record(FieldSample::with_variance(Utc::now(), 1, 2.1));
        assert_eq!(state.status, StabilityStatus::Breach);
        assert_eq!(state.breach_trigger, Some(BreachTrigger::Ceiling));
    }

    #[test]
    fn test_last_breach_severity_survives_recovery() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        let mut variances = vec![2.4];
        variances.extend(std::iter::repeat(0.0).take(10));
        let state = record_all(&mut tracker, &variances).pop().unwrap();
        assert_ne!(state.status, StabilityStatus::Breach);
        assert!(state.last_breach_severity.is_some());
        assert!(state.breach_severity().is_none());
    }

    #[test]
    fn test_summary_and_reset() {
        let mut tracker = StabilityTracker::new(&FieldConfig::default());
        record_all(&mut tracker, &[0.2, 0.4, 0.6]);
        let summary = tracker.summary();
        assert_eq!(summary.count, 3);
        assert!((summary.mean_variance - 0.4).abs() < 1e-9);
        assert!((summary.min_variance - 0.2).abs() < f64::EPSILON);
        assert!((summary.max_variance - 0.6).abs() < f64::EPSILON);

        tracker.reset();
        assert!(tracker.is_empty());
        assert_eq!(tracker.current(), &StabilityState::neutral());
    }

    #[test]
    fn test_custom_smoother() {
        #[derive(Debug)]
        struct LastValue;
        impl ScoreSmoother for LastValue {
            fn smooth(&self, _previous: Option<f64>, variance: f64) -> f64 {
                variance
            }
        }

        let mut tracker =
            StabilityTracker::new(&FieldConfig::default()).with_smoother(Arc::new(LastValue));
        let state = record_all(&mut tracker, &[1.5, 0.0]).pop().unwrap();
        assert!((state.score - 1.0).abs() < f64::EPSILON);
    }
}
