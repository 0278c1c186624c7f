//! Background optimizer.
//!
//! One long-lived task per session that samples the field, records the
//! sample, selects a strategy and publishes the resulting action:
//! - the latest action is published through a watch channel and read
//!   without blocking by any number of pipelines
//! - the loop shortens its interval while the field is in BREACH
//! - sustained decline escalates the action priority
//! - pipeline telemetry is folded into the next sample

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::models::{
    BreachTrigger, FieldConfig, OptimizationAction, PipelineTelemetry, SessionMetrics,
    StabilityState, StabilityStatus, Strategy, StrategyKind, Trend, MAX_PRIORITY,
};
use crate::domain::ports::SessionStateProvider;
use crate::services::field_sampler::{FieldSampler, VarianceAggregator};
use crate::services::stability_tracker::{ScoreSmoother, StabilityTracker};
use crate::services::strategy_selector::StrategySelector;

const EVENT_CAPACITY: usize = 256;

/// Extra priority per unit of breach severity.
const SEVERITY_PRIORITY_SPAN: f64 = 3.0;

/// Event emitted by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerEvent {
    /// Optimizer loop started.
    Started { session_id: Uuid },
    /// A tick published its action.
    TickCompleted {
        session_id: Uuid,
        tick: u64,
        status: StabilityStatus,
        score: f64,
        strategy: StrategyKind,
        priority: u8,
    },
    /// The field entered BREACH.
    BreachDetected {
        session_id: Uuid,
        tick: u64,
        severity: f64,
        trigger: Option<BreachTrigger>,
    },
    /// An action was escalated after sustained decline.
    Escalated {
        session_id: Uuid,
        tick: u64,
        priority: u8,
        declining_ticks: u32,
    },
    /// Optimizer loop stopped.
    Stopped { session_id: Uuid, total_ticks: u64 },
}

/// Counters maintained by the optimizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerStats {
    pub running: bool,
    pub total_ticks: u64,
    pub actions_by_strategy: BTreeMap<StrategyKind, u64>,
    /// Transitions into BREACH
    pub breaches: u64,
    /// Ticks spent in BREACH
    pub breach_ticks: u64,
    pub escalations: u64,
    pub degraded_samples: u64,
    pub telemetry_received: u64,
    pub total_tick_time: Duration,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl OptimizerStats {
    pub fn mean_tick_duration(&self) -> Duration {
        if self.total_ticks == 0 {
            return Duration::ZERO;
        }
        self.total_tick_time / u32::try_from(self.total_ticks).unwrap_or(u32::MAX)
    }
}

/// Aggregates over the retained action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerAnalytics {
    /// Actions the aggregates were computed over
    pub window: usize,
    pub mean_score: f64,
    pub mean_variance: f64,
    pub min_variance: f64,
    pub max_variance: f64,
    pub latest_trend: Trend,
    pub breach_ratio: f64,
    pub action_distribution: BTreeMap<StrategyKind, usize>,
    pub escalated_actions: usize,
}

impl OptimizerAnalytics {
    pub fn from_actions(actions: &[OptimizationAction]) -> Self {
        let variances: Vec<f64> = actions
            .iter()
            .filter_map(|a| a.stability.latest_variance)
            .collect();

        let mut action_distribution = BTreeMap::new();
        for action in actions {
            *action_distribution.entry(action.strategy.kind()).or_insert(0) += 1;
        }

        let window = actions.len();
        let mean = |sum: f64, n: usize| if n == 0 { 0.0 } else { sum / n as f64 };

        Self {
            window,
            mean_score: mean(actions.iter().map(|a| a.stability.score).sum(), window),
            mean_variance: mean(variances.iter().sum(), variances.len()),
            min_variance: variances.iter().copied().reduce(f64::min).unwrap_or(0.0),
            max_variance: variances.iter().copied().reduce(f64::max).unwrap_or(0.0),
            latest_trend: actions.last().map_or(Trend::Steady, |a| a.stability.trend),
            breach_ratio: mean(
                actions.iter().filter(|a| a.stability.is_breach()).count() as f64,
                window,
            ),
            action_distribution,
            escalated_actions: actions.iter().filter(|a| a.escalated).count(),
        }
    }
}

/// Cheap, cloneable reader of the latest published action.
#[derive(Debug, Clone)]
pub struct ActionSnapshot {
    rx: watch::Receiver<Arc<OptimizationAction>>,
}

impl ActionSnapshot {
    /// Latest published action. Never waits on the optimizer.
    pub fn latest(&self) -> Arc<OptimizationAction> {
        Arc::clone(&self.rx.borrow())
    }

    /// Snapshot that always reports `action`.
    pub fn fixed(action: OptimizationAction) -> Self {
        let (_tx, rx) = watch::channel(Arc::new(action));
        Self { rx }
    }

    /// Snapshot that always reports the initial action.
    pub fn detached() -> Self {
        Self::fixed(OptimizationAction::initial())
    }
}

/// Handle to a running optimizer.
pub struct OptimizerHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    snapshot: ActionSnapshot,
    events: broadcast::Sender<OptimizerEvent>,
    stats: Arc<RwLock<OptimizerStats>>,
    action_log: Arc<RwLock<VecDeque<OptimizationAction>>>,
    task: JoinHandle<()>,
}

impl OptimizerHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Latest published action; the initial action before the first tick.
    pub fn latest_action(&self) -> Arc<OptimizationAction> {
        self.snapshot.latest()
    }

    pub fn snapshot(&self) -> ActionSnapshot {
        self.snapshot.clone()
    }

    /// Subscribe to optimizer events.
    pub fn subscribe(&self) -> broadcast::Receiver<OptimizerEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Request the loop to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn stats(&self) -> OptimizerStats {
        self.stats.read().await.clone()
    }

    /// Retained actions, oldest first.
    pub async fn action_log(&self) -> Vec<OptimizationAction> {
        self.action_log.read().await.iter().cloned().collect()
    }

    pub async fn analytics(&self) -> OptimizerAnalytics {
        let actions = self.action_log().await;
        OptimizerAnalytics::from_actions(&actions)
    }

    /// Stop the loop and wait for the in-flight tick to finish.
    pub async fn stop(self) -> OptimizerStats {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(session_id = %self.session_id, error = %e, "optimizer task failed");
        }
        self.stats.read().await.clone()
    }
}

impl std::fmt::Debug for OptimizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerHandle")
            .field("session_id", &self.session_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Telemetry input and the budget used to turn durations into load.
struct TelemetryInput {
    rx: mpsc::Receiver<PipelineTelemetry>,
    budget: Duration,
}

/// Per-session background optimizer.
pub struct BackgroundOptimizer {
    session_id: Uuid,
    config: FieldConfig,
    provider: Arc<dyn SessionStateProvider>,
    sampler: FieldSampler,
    tracker: StabilityTracker,
    selector: StrategySelector,
    telemetry: Option<TelemetryInput>,
    snapshot_tx: watch::Sender<Arc<OptimizationAction>>,
    events: broadcast::Sender<OptimizerEvent>,
    stats: Arc<RwLock<OptimizerStats>>,
    action_log: Arc<RwLock<VecDeque<OptimizationAction>>>,
    cancel: CancellationToken,
    tick: u64,
    declining_streak: u32,
}

impl BackgroundOptimizer {
    /// Create an optimizer. The configuration is expected to be validated.
    pub fn new(
        session_id: Uuid,
        config: FieldConfig,
        provider: Arc<dyn SessionStateProvider>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(OptimizationAction::initial()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            session_id,
            sampler: FieldSampler::new(&config),
            tracker: StabilityTracker::new(&config),
            selector: StrategySelector::new(&config),
            action_log: Arc::new(RwLock::new(VecDeque::with_capacity(config.action_log_capacity))),
            config,
            provider,
            telemetry: None,
            snapshot_tx,
            events,
            stats: Arc::new(RwLock::new(OptimizerStats::default())),
            cancel: CancellationToken::new(),
            tick: 0,
            declining_streak: 0,
        }
    }

    /// Feed pipeline telemetry into sampling. `budget` is the pipeline
    /// timeout that a request's duration is measured against.
    pub fn with_telemetry(
        mut self,
        rx: mpsc::Receiver<PipelineTelemetry>,
        budget: Duration,
    ) -> Self {
        self.telemetry = Some(TelemetryInput { rx, budget });
        self
    }

    /// Replace the variance aggregation chosen by the configuration.
    pub fn with_aggregator(mut self, aggregator: Arc<dyn VarianceAggregator>) -> Self {
        self.sampler = self.sampler.with_aggregator(aggregator);
        self
    }

    /// Replace the default EWMA smoothing. Must be set before the first tick.
    pub fn with_smoother(mut self, smoother: Arc<dyn ScoreSmoother>) -> Self {
        self.tracker = StabilityTracker::new(&self.config).with_smoother(smoother);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot {
            rx: self.snapshot_tx.subscribe(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OptimizerEvent> {
        self.events.subscribe()
    }

    pub fn current_stability(&self) -> &StabilityState {
        self.tracker.current()
    }

    pub fn history_len(&self) -> usize {
        self.tracker.len()
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self) -> OptimizerHandle {
        let session_id = self.session_id;
        let cancel = self.cancel.clone();
        let snapshot = self.snapshot();
        let events = self.events.clone();
        let stats = Arc::clone(&self.stats);
        let action_log = Arc::clone(&self.action_log);

        let task = tokio::spawn(self.run_loop());

        OptimizerHandle {
            session_id,
            cancel,
            snapshot,
            events,
            stats,
            action_log,
            task,
        }
    }

    async fn run_loop(mut self) {
        self.stats.write().await.running = true;
        let _ = self.events.send(OptimizerEvent::Started {
            session_id: self.session_id,
        });
        tracing::info!(
            session_id = %self.session_id,
            tick_interval_ms = self.config.tick_interval_ms,
            "optimizer started"
        );

        let mut deadline = Instant::now() + self.current_interval();
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = sleep_until(deadline) => {}
            }

            // A started tick always runs to completion.
            self.tick_once().await;

            let now = Instant::now();
            deadline += self.current_interval();
            if deadline < now {
                deadline = now;
            }
        }

        self.stats.write().await.running = false;
        let _ = self.events.send(OptimizerEvent::Stopped {
            session_id: self.session_id,
            total_ticks: self.tick,
        });
        tracing::info!(session_id = %self.session_id, total_ticks = self.tick, "optimizer stopped");
    }

    /// Interval until the next tick: shortened while in BREACH.
    pub fn current_interval(&self) -> Duration {
        let ms = if self.tracker.current().is_breach() {
            self.config.remediation_interval_ms()
        } else {
            self.config.tick_interval_ms
        };
        Duration::from_millis(ms.max(1))
    }

    /// Run one sample → record → select → publish cycle.
    pub async fn tick_once(&mut self) -> Arc<OptimizationAction> {
        let started = Instant::now();
        self.tick += 1;
        let tick = self.tick;
        let was_breach = self.tracker.current().is_breach();

        let (metrics, telemetry_count) = self.read_metrics().await;
        let sample = self.sampler.sample(metrics.as_ref(), tick, Utc::now());
        let degraded = sample.degraded;
        let state = self.tracker.record(sample);
        let strategy = self.selector.select(&state);

        if state.trend == Trend::Declining {
            self.declining_streak = self.declining_streak.saturating_add(1);
        } else {
            self.declining_streak = 0;
        }
        let escalated = self.declining_streak >= self.config.escalation_tick_count;

        if let Strategy::LoadReduction { tolerance_widening, .. } = &strategy {
            self.tracker.relax_threshold(*tolerance_widening);
        }

        let priority = self.priority_for(&strategy, escalated);
        let confidence = self.confidence_for(strategy.kind(), &state, degraded);

        let action = Arc::new(OptimizationAction {
            id: Uuid::new_v4(),
            tick,
            strategy,
            priority,
            confidence,
            issued_at: Utc::now(),
            stability: state,
            escalated,
        });

        self.snapshot_tx.send_replace(Arc::clone(&action));
        self.record_action(&action, was_breach, degraded, telemetry_count, started.elapsed())
            .await;

        action
    }

    /// Session metrics for this tick with drained pipeline telemetry merged in.
    async fn read_metrics(&mut self) -> (Option<SessionMetrics>, usize) {
        let mut metrics = self.provider.session_metrics(self.session_id).await;

        let Some(input) = self.telemetry.as_mut() else {
            return (metrics, 0);
        };

        let mut drained = Vec::new();
        while let Ok(item) = input.rx.try_recv() {
            drained.push(item);
        }
        if drained.is_empty() {
            return (metrics, 0);
        }

        let n = drained.len() as f64;
        let quality = drained.iter().map(|t| t.quality_score).sum::<f64>() / n;
        let budget = input.budget.as_secs_f64().max(f64::EPSILON);
        let load = drained
            .iter()
            .map(|t| if t.timed_out { 1.0 } else { t.duration.as_secs_f64() / budget })
            .sum::<f64>()
            / n;

        if let Some(metrics) = metrics.as_mut() {
            metrics.set("pipeline_quality", quality.clamp(0.0, 1.0));
            metrics.set("pipeline_load", load.clamp(0.0, 1.0));
        }
        (metrics, drained.len())
    }

    fn priority_for(&self, strategy: &Strategy, escalated: bool) -> u8 {
        let mut priority = strategy.kind().base_priority();
        if let Strategy::Remediation { severity, .. } = strategy {
            priority = priority.saturating_add((severity * SEVERITY_PRIORITY_SPAN).round() as u8);
        }
        if escalated {
            priority = priority.saturating_add(self.config.escalation_boost);
        }
        priority.min(MAX_PRIORITY)
    }

    /// Base confidence of the strategy, reduced while history is still
    /// warming up and when the sample was degraded.
    fn confidence_for(&self, kind: StrategyKind, state: &StabilityState, degraded: bool) -> f64 {
        let warmup_samples = (self.config.trend_window * 2).max(1) as f64;
        let warmup = (state.sample_count as f64 / warmup_samples).min(1.0);
        let mut confidence = kind.base_confidence() * warmup;
        if degraded {
            confidence *= 0.5;
        }
        confidence.clamp(0.0, 1.0)
    }

    async fn record_action(
        &self,
        action: &OptimizationAction,
        was_breach: bool,
        degraded: bool,
        telemetry_count: usize,
        elapsed: Duration,
    ) {
        let state = &action.stability;
        let entered_breach = state.is_breach() && !was_breach;

        {
            let mut log = self.action_log.write().await;
            if log.len() >= self.config.action_log_capacity.max(1) {
                log.pop_front();
            }
            log.push_back(action.clone());
        }

        {
            let mut stats = self.stats.write().await;
            stats.total_ticks += 1;
            *stats.actions_by_strategy.entry(action.strategy.kind()).or_insert(0) += 1;
            if state.is_breach() {
                stats.breach_ticks += 1;
            }
            if entered_breach {
                stats.breaches += 1;
            }
            if action.escalated {
                stats.escalations += 1;
            }
            if degraded {
                stats.degraded_samples += 1;
            }
            stats.telemetry_received += telemetry_count as u64;
            stats.total_tick_time += elapsed;
            stats.last_tick_at = Some(action.issued_at);
        }

        if entered_breach {
            let severity = state.breach_severity().unwrap_or(0.0);
            tracing::warn!(
                session_id = %self.session_id,
                tick = action.tick,
                severity,
                score = state.score,
                trigger = ?state.breach_trigger,
                "field breach detected"
            );
            let _ = self.events.send(OptimizerEvent::BreachDetected {
                session_id: self.session_id,
                tick: action.tick,
                severity,
                trigger: state.breach_trigger,
            });
        } else if was_breach && state.status.is_recovered() {
            tracing::info!(
                session_id = %self.session_id,
                tick = action.tick,
                status = %state.status,
                "field recovered from breach"
            );
        }

        if action.escalated {
            tracing::warn!(
                session_id = %self.session_id,
                tick = action.tick,
                priority = action.priority,
                declining_ticks = self.declining_streak,
                "action escalated after sustained decline"
            );
            let _ = self.events.send(OptimizerEvent::Escalated {
                session_id: self.session_id,
                tick: action.tick,
                priority: action.priority,
                declining_ticks: self.declining_streak,
            });
        }

        tracing::debug!(
            session_id = %self.session_id,
            tick = action.tick,
            status = %state.status,
            trend = %state.trend,
            score = state.score,
            strategy = %action.strategy.kind(),
            priority = action.priority,
            confidence = action.confidence,
            "tick completed"
        );
        let _ = self.events.send(OptimizerEvent::TickCompleted {
            session_id: self.session_id,
            tick: action.tick,
            status: state.status,
            score: state.score,
            strategy: action.strategy.kind(),
            priority: action.priority,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Aggregation;
    use crate::services::session_state::InMemorySessionState;

    fn healthy() -> SessionMetrics {
        SessionMetrics::new()
            .with("coherence", 0.9)
            .with("coordination_ratio", 0.8)
            .with("activity_rate", 0.5)
            .with("active_processes", 3.0)
    }

    async fn optimizer_with(metrics: Option<SessionMetrics>) -> BackgroundOptimizer {
        let session_id = Uuid::new_v4();
        let provider = Arc::new(InMemorySessionState::new());
        if let Some(metrics) = metrics {
            provider.set(session_id, metrics).await;
        }
        BackgroundOptimizer::new(session_id, FieldConfig::default(), provider)
    }

    #[tokio::test]
    async fn test_snapshot_starts_with_initial_action() {
        let optimizer = optimizer_with(None).await;
        let snapshot = optimizer.snapshot();
        let action = snapshot.latest();
        assert!(action.is_initial());
        assert_eq!(action.strategy, Strategy::StandardPass);
    }

    #[tokio::test]
    async fn test_tick_publishes_action() {
        let mut optimizer = optimizer_with(Some(healthy())).await;
        let snapshot = optimizer.snapshot();
        let action = optimizer.tick_once().await;
        assert_eq!(action.tick, 1);
        assert_eq!(snapshot.latest().tick, 1);
        assert_eq!(action.stability.status, StabilityStatus::Stable);
        assert_eq!(action.strategy, Strategy::StandardPass);
    }

    #[tokio::test]
    async fn test_ticks_are_strictly_increasing() {
        let mut optimizer = optimizer_with(Some(healthy())).await;
        let mut last = 0;
        for _ in 0..10 {
            let action = optimizer.tick_once().await;
            assert!(action.tick > last);
            last = action.tick;
        }
    }

    #[tokio::test]
    async fn test_missing_state_degrades_confidence() {
        let mut optimizer = optimizer_with(None).await;
        let mut action = optimizer.tick_once().await;
        for _ in 0..10 {
            action = optimizer.tick_once().await;
        }
        // default variance 1.0 keeps the field in WATCH
        assert_eq!(action.stability.status, StabilityStatus::Watch);
        assert!(action.confidence <= action.strategy.kind().base_confidence() * 0.5 + 1e-9);
    }

    #[tokio::test]
    async fn test_breach_selects_remediation_with_high_priority() {
        let metrics = SessionMetrics::new()
            .with("coherence", 0.0)
            .with("coordination_ratio", 0.0)
            .with("activity_rate", 0.0)
            .with("active_processes", 20.0);
        let mut optimizer = optimizer_with(Some(metrics)).await;
        let mut events = optimizer.subscribe();

        let action = optimizer.tick_once().await;
        assert!(action.stability.is_breach());
        assert!(matches!(action.strategy, Strategy::Remediation { .. }));
        assert!(action.priority >= StrategyKind::Remediation.base_priority());
        assert!(optimizer.current_interval() < Duration::from_millis(100));

        let first = events.recv().await.unwrap();
        assert!(matches!(first, OptimizerEvent::BreachDetected { tick: 1, .. }));
    }

    #[tokio::test]
    async fn test_sustained_decline_escalates() {
        let session_id = Uuid::new_v4();
        let provider = Arc::new(InMemorySessionState::new());
        let mut optimizer =
            BackgroundOptimizer::new(session_id, FieldConfig::default(), provider.clone());

        let mut coherence = 0.6;
        let mut escalated = None;
        for _ in 0..8 {
            provider.set(session_id, healthy().with("coherence", coherence)).await;
            let action = optimizer.tick_once().await;
            if action.escalated {
                escalated = Some(action);
                break;
            }
            coherence -= 0.1;
        }

        let action = escalated.expect("decline should escalate");
        assert!(action.stability.trend == Trend::Declining);
        let base = action.strategy.kind().base_priority();
        assert!(action.priority > base || action.priority == MAX_PRIORITY);
    }

    fn lagging_pair() -> SessionMetrics {
        healthy().with("coherence", 0.1).with("coordination_ratio", 0.1)
    }

    #[tokio::test]
    async fn test_configured_aggregation_drives_variance() {
        let session_id = Uuid::new_v4();
        let provider = Arc::new(InMemorySessionState::new());
        provider.set(session_id, lagging_pair()).await;

        let mut weighted =
            BackgroundOptimizer::new(session_id, FieldConfig::default(), provider.clone());
        let config = FieldConfig {
            aggregation: Aggregation::Quadratic,
            ..Default::default()
        };
        let mut quadratic = BackgroundOptimizer::new(session_id, config, provider);

        let weighted = weighted.tick_once().await;
        let quadratic = quadratic.tick_once().await;
        assert!((weighted.stability.latest_variance.unwrap() - 0.9).abs() < 1e-9);
        let variance = quadratic.stability.latest_variance.unwrap();
        assert!((variance - 0.41_f64.sqrt()).abs() < 1e-9);
        assert!(quadratic.stability.score > weighted.stability.score);
    }

    #[tokio::test]
    async fn test_custom_smoother_drives_score() {
        #[derive(Debug)]
        struct Calm;
        impl ScoreSmoother for Calm {
            fn smooth(&self, _previous: Option<f64>, _variance: f64) -> f64 {
                0.0
            }
        }

        let session_id = Uuid::new_v4();
        let provider = Arc::new(InMemorySessionState::new());
        provider.set(session_id, lagging_pair()).await;
        let mut optimizer =
            BackgroundOptimizer::new(session_id, FieldConfig::default(), provider)
                .with_smoother(Arc::new(Calm));

        let action = optimizer.tick_once().await;
        assert_eq!(action.stability.score, 1.0);
        assert_eq!(action.stability.status, StabilityStatus::Stable);
    }

    #[tokio::test]
    async fn test_action_log_is_bounded() {
        let session_id = Uuid::new_v4();
        let provider = Arc::new(InMemorySessionState::new());
        let config = FieldConfig {
            action_log_capacity: 4,
            ..Default::default()
        };
        let optimizer = BackgroundOptimizer::new(session_id, config, provider);
        let log = Arc::clone(&optimizer.action_log);
        let mut optimizer = optimizer;
        for _ in 0..10 {
            optimizer.tick_once().await;
        }
        let log = log.read().await;
        assert_eq!(log.len(), 4);
        assert_eq!(log.front().map(|a| a.tick), Some(7));
    }

    #[tokio::test]
    async fn test_telemetry_is_merged_into_sample() {
        let session_id = Uuid::new_v4();
        let provider = Arc::new(InMemorySessionState::new());
        provider.set(session_id, healthy()).await;
        let (tx, rx) = mpsc::channel(8);
        let mut optimizer = BackgroundOptimizer::new(session_id, FieldConfig::default(), provider)
            .with_telemetry(rx, Duration::from_millis(250));

        tx.try_send(PipelineTelemetry {
            session_id,
            quality_score: 0.1,
            mode_used: crate::domain::models::ExecutionMode::Standard,
            duration: Duration::from_millis(10),
            timed_out: false,
            at: Utc::now(),
        })
        .unwrap();

        let action = optimizer.tick_once().await;
        // pipeline_quality 0.1 is below its 0.5 target
        assert_eq!(
            action.stability.lagging_component.as_ref().map(|d| d.component.as_str()),
            Some("pipeline_quality")
        );
        assert_eq!(optimizer.stats.read().await.telemetry_received, 1);
    }

    #[tokio::test]
    async fn test_stop_is_graceful() {
        let optimizer = optimizer_with(Some(healthy())).await;
        let handle = optimizer.spawn();
        let mut events = handle.subscribe();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let stats = handle.stop().await;
        assert!(!stats.running);
        assert!(stats.total_ticks >= 1);

        let mut stopped = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, OptimizerEvent::Stopped { .. }) {
                stopped = true;
            }
        }
        assert!(stopped);
    }

    #[test]
    fn test_analytics_from_actions() {
        let mut stable = OptimizationAction::initial();
        stable.tick = 1;
        stable.stability.score = 0.8;
        stable.stability.latest_variance = Some(0.2);

        let mut breach = OptimizationAction::initial();
        breach.tick = 2;
        breach.strategy = Strategy::Remediation { severity: 0.5, correction: 0.5 };
        breach.stability.score = 0.2;
        breach.stability.status = StabilityStatus::Breach;
        breach.stability.latest_variance = Some(2.4);
        breach.escalated = true;

        let analytics = OptimizerAnalytics::from_actions(&[stable, breach]);
        assert_eq!(analytics.window, 2);
        assert!((analytics.mean_score - 0.5).abs() < 1e-9);
        assert!((analytics.min_variance - 0.2).abs() < f64::EPSILON);
        assert!((analytics.max_variance - 2.4).abs() < f64::EPSILON);
        assert!((analytics.breach_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(analytics.escalated_actions, 1);
        assert_eq!(analytics.action_distribution.get(&StrategyKind::Remediation), Some(&1));
    }

    #[test]
    fn test_analytics_empty_log() {
        let analytics = OptimizerAnalytics::from_actions(&[]);
        assert_eq!(analytics.window, 0);
        assert!(analytics.mean_score.abs() < f64::EPSILON);
        assert_eq!(analytics.latest_trend, Trend::Steady);
    }

    #[test]
    fn test_stats_mean_tick_duration() {
        let stats = OptimizerStats {
            total_ticks: 4,
            total_tick_time: Duration::from_millis(8),
            ..Default::default()
        };
        assert_eq!(stats.mean_tick_duration(), Duration::from_millis(2));
        assert_eq!(OptimizerStats::default().mean_tick_duration(), Duration::ZERO);
    }
}
