//! Strategy selector.
//!
//! Pure mapping from a [`StabilityState`] to the [`Strategy`] the pipeline
//! should run under. BREACH dominates WATCH or DECLINING, which dominates a
//! lagging component on an otherwise stable field.

use crate::domain::models::{FieldConfig, StabilityState, StabilityStatus, Strategy, Trend};

#[derive(Debug, Clone, PartialEq)]
pub struct StrategySelector {
    max_amplification: f64,
    max_correction: f64,
    tolerance_widening: f64,
}

impl StrategySelector {
    pub fn new(config: &FieldConfig) -> Self {
        Self {
            max_amplification: config.max_amplification,
            max_correction: config.max_correction,
            tolerance_widening: config.tolerance_widening,
        }
    }

    pub fn select(&self, state: &StabilityState) -> Strategy {
        if let Some(severity) = state.breach_severity() {
            let severity = severity.clamp(0.0, 1.0);
            return Strategy::Remediation {
                severity,
                correction: severity * self.max_correction,
            };
        }

        if state.status == StabilityStatus::Watch || state.trend == Trend::Declining {
            return Strategy::LoadReduction {
                skip_enrichment: true,
                tolerance_widening: self.tolerance_widening,
            };
        }

        if let Some(deficit) = &state.lagging_component {
            return Strategy::TargetedAmplification {
                component: deficit.component.clone(),
                amplification: self.amplification_for(deficit.shortfall(), deficit.target),
            };
        }

        Strategy::StandardPass
    }

    /// Amplification proportional to the relative shortfall, capped at the
    /// configured maximum.
    fn amplification_for(&self, shortfall: f64, target: f64) -> f64 {
        if target <= 0.0 {
            return self.max_amplification;
        }
        (1.0 + shortfall / target).min(self.max_amplification).max(1.0)
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new(&FieldConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BreachTrigger, ComponentDeficit, StrategyKind};

    fn state(status: StabilityStatus, trend: Trend) -> StabilityState {
        StabilityState {
            status,
            trend,
            score: match status {
                StabilityStatus::Stable => 0.9,
                StabilityStatus::Watch => 0.55,
                StabilityStatus::Breach => 0.2,
            },
            ..StabilityState::neutral()
        }
    }

    fn lagging(component: &str, value: f64, target: f64) -> Option<ComponentDeficit> {
        Some(ComponentDeficit {
            component: component.to_string(),
            value,
            target,
        })
    }

    #[test]
    fn test_breach_selects_remediation_with_severity() {
        let mut breach = state(StabilityStatus::Breach, Trend::Declining);
        breach.last_breach_severity = Some(0.4);
        breach.breach_trigger = Some(BreachTrigger::Threshold);
        breach.lagging_component = lagging("coherence", 0.1, 0.6);

        match StrategySelector::default().select(&breach) {
            Strategy::Remediation { severity, correction } => {
                assert!((severity - 0.4).abs() < f64::EPSILON);
                assert!((correction - 0.4).abs() < f64::EPSILON);
            }
            other => panic!("expected remediation, got {other:?}"),
        }
    }

    #[test]
    fn test_watch_selects_load_reduction() {
        let strategy =
            StrategySelector::default().select(&state(StabilityStatus::Watch, Trend::Improving));
        assert_eq!(
            strategy,
            Strategy::LoadReduction {
                skip_enrichment: true,
                tolerance_widening: 0.1,
            }
        );
    }

    #[test]
    fn test_declining_stable_selects_load_reduction() {
        let mut stable = state(StabilityStatus::Stable, Trend::Declining);
        stable.lagging_component = lagging("coherence", 0.5, 0.6);
        let strategy = StrategySelector::default().select(&stable);
        assert_eq!(strategy.kind(), StrategyKind::LoadReduction);
    }

    #[test]
    fn test_stable_with_lagging_component_amplifies_it() {
        let mut stable = state(StabilityStatus::Stable, Trend::Steady);
        stable.lagging_component = lagging("coordination_ratio", 0.4, 0.5);

        match StrategySelector::default().select(&stable) {
            Strategy::TargetedAmplification { component, amplification } => {
                assert_eq!(component, "coordination_ratio");
                assert!((amplification - 1.2).abs() < 1e-9);
            }
            other => panic!("expected amplification, got {other:?}"),
        }
    }

    #[test]
    fn test_amplification_is_capped() {
        let mut stable = state(StabilityStatus::Stable, Trend::Improving);
        stable.lagging_component = lagging("coherence", 0.0, 0.6);
        match StrategySelector::default().select(&stable) {
            Strategy::TargetedAmplification { amplification, .. } => {
                assert!((amplification - 1.5).abs() < f64::EPSILON);
            }
            other => panic!("expected amplification, got {other:?}"),
        }
    }

    #[test]
    fn test_amplification_never_below_one() {
        let selector = StrategySelector::new(&FieldConfig {
            max_amplification: 0.5,
            ..Default::default()
        });
        let mut stable = state(StabilityStatus::Stable, Trend::Steady);
        stable.lagging_component = lagging("coherence", 0.55, 0.6);
        match selector.select(&stable) {
            Strategy::TargetedAmplification { amplification, .. } => {
                assert!((amplification - 1.0).abs() < f64::EPSILON);
            }
            other => panic!("expected amplification, got {other:?}"),
        }
    }

    #[test]
    fn test_stable_field_standard_pass() {
        let strategy =
            StrategySelector::default().select(&state(StabilityStatus::Stable, Trend::Steady));
        assert_eq!(strategy, Strategy::StandardPass);
    }

    #[test]
    fn test_neutral_state_reduces_load() {
        let strategy = StrategySelector::default().select(&StabilityState::neutral());
        assert_eq!(strategy.kind(), StrategyKind::LoadReduction);
    }

    #[test]
    fn test_higher_severity_yields_larger_correction() {
        let selector = StrategySelector::default();
        let correction = |severity: f64| {
            let mut breach = state(StabilityStatus::Breach, Trend::Steady);
            breach.last_breach_severity = Some(severity);
            match selector.select(&breach) {
                Strategy::Remediation { correction, .. } => correction,
                other => panic!("expected remediation, got {other:?}"),
            }
        };
        assert!(correction(0.8) > correction(0.3));
    }
}
