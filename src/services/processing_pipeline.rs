//! Processing pipeline.
//!
//! Routes each request through Preparation → Analysis → AdaptiveExecution.
//! The latest optimizer action is read once at entry and every stage runs
//! against that one snapshot. A request never fails: degraded input,
//! processor errors and timeouts all produce a result with quality penalties.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AnalysisReport, Difficulty, Enrichment, ExecutionMode, ExecutionReport, OptimizationAction,
    PipelineConfig, PipelineStage, PipelineTelemetry, PreparedInput, ProcessingRequest,
    ProcessingResult, QualityPenalty, ReinforcementDirective, ReinforcementOutcome,
    ReinforcementTarget, StageDetail, StageOutput, StageStatus, Strategy, StructureKind,
};
use crate::domain::ports::FieldProcessor;
use crate::services::background_optimizer::ActionSnapshot;

const COMPLETENESS_WEIGHT: f64 = 0.6;
const MODE_MATCH_WEIGHT: f64 = 0.4;

/// Per-stage counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStats {
    pub executions: u64,
    pub degraded: u64,
    pub total_time: Duration,
}

impl StageStats {
    pub fn mean_time(&self) -> Duration {
        if self.executions == 0 {
            return Duration::ZERO;
        }
        self.total_time / u32::try_from(self.executions).unwrap_or(u32::MAX)
    }
}

/// Counters maintained by a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_requests: u64,
    pub stages: BTreeMap<PipelineStage, StageStats>,
    pub modes: BTreeMap<ExecutionMode, u64>,
    pub timeouts: u64,
    pub fallbacks: u64,
    pub penalized: u64,
    pub total_quality: f64,
    pub total_duration: Duration,
    pub telemetry_dropped: u64,
}

impl PipelineStats {
    pub fn mean_quality(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.total_quality / self.total_requests as f64
    }

    pub fn mean_duration(&self) -> Duration {
        if self.total_requests == 0 {
            return Duration::ZERO;
        }
        self.total_duration / u32::try_from(self.total_requests).unwrap_or(u32::MAX)
    }
}

/// Aggregates over the retained result history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineAnalytics {
    pub window: usize,
    pub mean_quality: f64,
    pub min_quality: f64,
    pub max_quality: f64,
    pub mean_duration: Duration,
    pub mode_distribution: BTreeMap<ExecutionMode, usize>,
    pub timeout_rate: f64,
    pub fallback_rate: f64,
    /// Share of results that ran in the recommended mode
    pub recommendation_match_rate: f64,
}

impl PipelineAnalytics {
    pub fn from_results(results: &[ProcessingResult]) -> Self {
        let window = results.len();
        let ratio = |count: usize| if window == 0 { 0.0 } else { count as f64 / window as f64 };

        let mut mode_distribution = BTreeMap::new();
        for result in results {
            *mode_distribution.entry(result.mode_used).or_insert(0) += 1;
        }

        let total_duration: Duration = results.iter().map(|r| r.duration).sum();
        let fallbacks = results
            .iter()
            .filter(|r| r.execution().is_some_and(|e| e.fallback_reason.is_some()))
            .count();

        Self {
            window,
            mean_quality: if window == 0 {
                0.0
            } else {
                results.iter().map(|r| r.quality_score).sum::<f64>() / window as f64
            },
            min_quality: results.iter().map(|r| r.quality_score).reduce(f64::min).unwrap_or(0.0),
            max_quality: results.iter().map(|r| r.quality_score).reduce(f64::max).unwrap_or(0.0),
            mean_duration: if window == 0 {
                Duration::ZERO
            } else {
                total_duration / u32::try_from(window).unwrap_or(u32::MAX)
            },
            mode_distribution,
            timeout_rate: ratio(results.iter().filter(|r| r.timed_out()).count()),
            fallback_rate: ratio(fallbacks),
            recommendation_match_rate: ratio(
                results.iter().filter(|r| r.mode_used == r.recommended_mode).count(),
            ),
        }
    }
}

/// Per-session request pipeline.
pub struct ProcessingPipeline {
    session_id: Uuid,
    snapshot: ActionSnapshot,
    processor: Arc<dyn FieldProcessor>,
    config: PipelineConfig,
    telemetry: Option<mpsc::Sender<PipelineTelemetry>>,
    stats: RwLock<PipelineStats>,
    history: RwLock<VecDeque<ProcessingResult>>,
}

impl ProcessingPipeline {
    pub fn new(
        session_id: Uuid,
        snapshot: ActionSnapshot,
        processor: Arc<dyn FieldProcessor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            session_id,
            snapshot,
            processor,
            history: RwLock::new(VecDeque::with_capacity(config.history_capacity)),
            config,
            telemetry: None,
            stats: RwLock::new(PipelineStats::default()),
        }
    }

    /// Send per-request telemetry to the session's optimizer.
    pub fn with_telemetry(mut self, tx: mpsc::Sender<PipelineTelemetry>) -> Self {
        self.telemetry = Some(tx);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms.max(1))
    }

    /// Process one request under the current optimizer action.
    pub async fn process(&self, request: ProcessingRequest) -> ProcessingResult {
        let started = Instant::now();
        let action = self.snapshot.latest();
        let mut penalties = Vec::new();
        let mut stage_outputs = Vec::with_capacity(PipelineStage::ALL.len());

        let stage_start = Instant::now();
        let prepared = prepare(&request, &mut penalties);
        stage_outputs.push(StageOutput {
            stage: PipelineStage::Preparation,
            status: if penalties.is_empty() {
                StageStatus::Completed
            } else {
                StageStatus::Degraded
            },
            elapsed: stage_start.elapsed(),
            detail: StageDetail::Preparation(prepared.clone()),
        });

        let stage_start = Instant::now();
        let report = analyze(&prepared, &action.strategy);
        stage_outputs.push(StageOutput {
            stage: PipelineStage::Analysis,
            status: if prepared.substituted {
                StageStatus::Degraded
            } else {
                StageStatus::Completed
            },
            elapsed: stage_start.elapsed(),
            detail: StageDetail::Analysis(report.clone()),
        });

        let stage_start = Instant::now();
        let remaining = self.budget().saturating_sub(started.elapsed());
        let execution = tokio::time::timeout(
            remaining,
            self.execute(request.request_id, &prepared, &report, &action),
        )
        .await;

        let (execution, status) = match execution {
            Ok(Ok(execution)) => (execution, StageStatus::Completed),
            Ok(Err(e)) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    request_id = %request.request_id,
                    mode = %report.recommended_mode,
                    error = %e,
                    "execution failed, falling back to standard"
                );
                penalties.push(QualityPenalty::ExecutionFallback(e.to_string()));
                (
                    standard_execution(&prepared, &report, Some(e.to_string())),
                    StageStatus::FellBack,
                )
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    request_id = %request.request_id,
                    budget_ms = self.config.timeout_ms,
                    "execution timed out, returning standard result"
                );
                penalties.push(QualityPenalty::Timeout);
                (
                    standard_execution(&prepared, &report, Some("timeout".to_string())),
                    StageStatus::FellBack,
                )
            }
        };

        let mode_used = execution.mode;
        let mut insights = report.insights.clone();
        if let Some(enrichment) = &execution.enrichment {
            for insight in &enrichment.insights {
                if !insights.contains(insight) {
                    insights.push(insight.clone());
                }
            }
        }

        stage_outputs.push(StageOutput {
            stage: PipelineStage::AdaptiveExecution,
            status,
            elapsed: stage_start.elapsed(),
            detail: StageDetail::AdaptiveExecution(execution),
        });

        let quality_score =
            quality_score(&stage_outputs, mode_used, report.recommended_mode, &penalties);

        let result = ProcessingResult {
            request_id: request.request_id,
            session_id: self.session_id,
            stage_outputs,
            quality_score,
            mode_used,
            recommended_mode: report.recommended_mode,
            action_tick: action.tick,
            strategy: action.strategy.kind(),
            penalties,
            insights,
            duration: started.elapsed(),
            completed_at: Utc::now(),
        };

        tracing::debug!(
            session_id = %self.session_id,
            request_id = %result.request_id,
            mode = %result.mode_used,
            quality = result.quality_score,
            action_tick = result.action_tick,
            duration_ms = result.duration.as_millis() as u64,
            "request processed"
        );

        self.record(&result).await;
        result
    }

    async fn execute(
        &self,
        request_id: Uuid,
        prepared: &PreparedInput,
        report: &AnalysisReport,
        action: &OptimizationAction,
    ) -> DomainResult<ExecutionReport> {
        match report.recommended_mode {
            ExecutionMode::Standard => Ok(standard_execution(prepared, report, None)),
            ExecutionMode::Synchronized => Ok(ExecutionReport {
                mode: ExecutionMode::Synchronized,
                output: baseline_output(prepared, report),
                enrichment: None,
                reinforcement: None,
                fallback_reason: None,
            }),
            ExecutionMode::FieldAware => {
                let directive = ReinforcementDirective {
                    session_id: self.session_id,
                    request_id,
                    target: reinforcement_target(&action.strategy),
                };
                let outcome = self.processor.reinforce(&directive).await?;
                Ok(field_aware_execution(prepared, report, outcome))
            }
        }
    }

    async fn record(&self, result: &ProcessingResult) {
        {
            let mut stats = self.stats.write().await;
            stats.total_requests += 1;
            for output in &result.stage_outputs {
                let stage = stats.stages.entry(output.stage).or_default();
                stage.executions += 1;
                stage.total_time += output.elapsed;
                if output.status != StageStatus::Completed {
                    stage.degraded += 1;
                }
            }
            *stats.modes.entry(result.mode_used).or_insert(0) += 1;
            if result.timed_out() {
                stats.timeouts += 1;
            }
            if result
                .penalties
                .iter()
                .any(|p| matches!(p, QualityPenalty::ExecutionFallback(_)))
            {
                stats.fallbacks += 1;
            }
            if !result.penalties.is_empty() {
                stats.penalized += 1;
            }
            stats.total_quality += result.quality_score;
            stats.total_duration += result.duration;
        }

        {
            let mut history = self.history.write().await;
            if history.len() >= self.config.history_capacity.max(1) {
                history.pop_front();
            }
            history.push_back(result.clone());
        }

        if let Some(tx) = &self.telemetry {
            if tx.try_send(PipelineTelemetry::from(result)).is_err() {
                self.stats.write().await.telemetry_dropped += 1;
                tracing::debug!(
                    session_id = %self.session_id,
                    "telemetry buffer full, dropping record"
                );
            }
        }
    }

    pub async fn stats(&self) -> PipelineStats {
        self.stats.read().await.clone()
    }

    /// Retained results, oldest first.
    pub async fn history(&self) -> Vec<ProcessingResult> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Analytics over the most recent `limit` results.
    pub async fn analytics(&self, limit: usize) -> PipelineAnalytics {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        let recent: Vec<ProcessingResult> = history.iter().skip(skip).cloned().collect();
        PipelineAnalytics::from_results(&recent)
    }
}

impl std::fmt::Debug for ProcessingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingPipeline")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Preparation
// ---------------------------------------------------------------------------

/// Normalize the request. Penalties are appended for every repair made.
pub fn prepare(request: &ProcessingRequest, penalties: &mut Vec<QualityPenalty>) -> PreparedInput {
    if request.malformed {
        penalties.push(QualityPenalty::MalformedRequest);
    }

    let mut substituted = false;
    let content = match normalize(&request.content) {
        Some(content) => {
            if is_empty_content(&content) {
                penalties.push(QualityPenalty::EmptyContent);
            }
            content
        }
        None => {
            if !request.malformed {
                penalties.push(QualityPenalty::MissingContent);
            }
            substituted = true;
            Value::String(String::new())
        }
    };

    let mut aspects: Vec<String> = Vec::with_capacity(request.aspects.len());
    for raw in &request.aspects {
        let aspect = raw.trim().to_lowercase();
        if aspect.is_empty() {
            penalties.push(QualityPenalty::InvalidAspect(raw.clone()));
        } else if !aspects.contains(&aspect) {
            aspects.push(aspect);
        }
    }

    let content_length = match &content {
        Value::String(s) => s.chars().count(),
        other => other.to_string().len(),
    };

    PreparedInput {
        content,
        aspects,
        content_length,
        substituted,
    }
}

/// Trim strings and drop nulls recursively. `None` when nothing is left.
fn normalize(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(Value::String(s.trim().to_string())),
        Value::Array(items) => Some(Value::Array(items.iter().filter_map(normalize).collect())),
        Value::Object(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k.clone(), v)))
                .collect::<Map<String, Value>>(),
        )),
        other => Some(other.clone()),
    }
}

fn is_empty_content(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Analyze prepared content and recommend an execution mode for `strategy`.
pub fn analyze(prepared: &PreparedInput, strategy: &Strategy) -> AnalysisReport {
    let content = &prepared.content;
    let structure = structure_of(content);

    let (size, nesting_depth, complexity) = match content {
        Value::String(s) => {
            let words = s.split_whitespace().count();
            (words, 0, words as f64 / 200.0)
        }
        Value::Object(map) => {
            let depth = nesting_depth(content);
            (map.len(), depth, (map.len() + depth * 2) as f64 / 30.0)
        }
        Value::Array(items) => (items.len(), nesting_depth(content), items.len() as f64 / 100.0),
        Value::Bool(_) | Value::Number(_) => (1, 0, 0.0),
        Value::Null => (0, 0, 0.0),
    };
    let complexity = complexity.min(1.0);

    let difficulty = if complexity < 0.3 {
        Difficulty::Easy
    } else if complexity < 0.7 {
        Difficulty::Medium
    } else {
        Difficulty::Hard
    };

    let aspect_compatibility = prepared
        .aspects
        .iter()
        .map(|aspect| (aspect.clone(), aspect_compatibility(aspect, structure)))
        .collect();

    let recommended_mode = if structure == StructureKind::Empty {
        ExecutionMode::Standard
    } else {
        match strategy {
            Strategy::TargetedAmplification { .. } | Strategy::Remediation { .. } => {
                ExecutionMode::FieldAware
            }
            Strategy::LoadReduction { .. } => ExecutionMode::Synchronized,
            Strategy::StandardPass => ExecutionMode::Standard,
        }
    };

    let mut insights = Vec::new();
    if complexity > 0.7 {
        insights.push("high-complexity".to_string());
    }
    if difficulty == Difficulty::Hard {
        insights.push("extended-processing".to_string());
    }
    if prepared.aspects.len() > 3 {
        insights.push("multi-aspect".to_string());
    }
    match strategy {
        Strategy::Remediation { .. } => insights.push("field-remediation".to_string()),
        Strategy::LoadReduction { .. } => insights.push("load-reduction".to_string()),
        Strategy::TargetedAmplification { component, .. } => {
            insights.push(format!("amplify:{component}"));
        }
        Strategy::StandardPass => {}
    }

    AnalysisReport {
        structure,
        size,
        nesting_depth,
        complexity,
        difficulty,
        aspect_compatibility,
        recommended_mode,
        insights,
    }
}

fn structure_of(value: &Value) -> StructureKind {
    if is_empty_content(value) {
        return StructureKind::Empty;
    }
    match value {
        Value::String(_) => StructureKind::Text,
        Value::Object(_) => StructureKind::Structured,
        Value::Array(_) => StructureKind::Sequential,
        Value::Bool(_) | Value::Number(_) => StructureKind::Scalar,
        Value::Null => StructureKind::Empty,
    }
}

/// Levels of containers nested below the top-level value.
fn nesting_depth(value: &Value) -> usize {
    let child_depth = |child: &Value| {
        (child.is_object() || child.is_array()).then(|| 1 + nesting_depth(child))
    };
    match value {
        Value::Object(map) => map.values().filter_map(child_depth).max().unwrap_or(0),
        Value::Array(items) => items.iter().filter_map(child_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Compatibility of an aspect with content of the given structure.
pub fn aspect_compatibility(aspect: &str, structure: StructureKind) -> f64 {
    let base = match aspect {
        "analytical" => 0.8,
        "experiential" => 0.7,
        "observer" => 0.6,
        "creative" => 0.5,
        "intuitive" => 0.4,
        _ => 0.5,
    };
    let bonus = match (structure, aspect) {
        (StructureKind::Text, "analytical" | "experiential")
        | (StructureKind::Structured, "analytical" | "observer") => 0.1,
        _ => 0.0,
    };
    f64::min(1.0, base + bonus)
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn reinforcement_target(strategy: &Strategy) -> ReinforcementTarget {
    match strategy {
        Strategy::TargetedAmplification {
            component,
            amplification,
        } => ReinforcementTarget::Component {
            name: component.clone(),
            amplification: *amplification,
        },
        Strategy::Remediation { correction, .. } => ReinforcementTarget::Field {
            correction: *correction,
        },
        Strategy::StandardPass | Strategy::LoadReduction { .. } => {
            ReinforcementTarget::Field { correction: 0.0 }
        }
    }
}

fn baseline_output(prepared: &PreparedInput, report: &AnalysisReport) -> Value {
    json!({
        "content": prepared.content,
        "structure": report.structure,
        "size": report.size,
        "complexity": report.complexity,
        "difficulty": report.difficulty,
    })
}

fn enrich(report: &AnalysisReport) -> Enrichment {
    let dominant_aspect = report
        .aspect_compatibility
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(aspect, _)| aspect.clone());

    let mut insights = Vec::new();
    if let Some(aspect) = &dominant_aspect {
        insights.push(format!("dominant-aspect:{aspect}"));
    }
    if report.nesting_depth > 2 {
        insights.push("deep-structure".to_string());
    }

    Enrichment {
        dominant_aspect,
        insights,
    }
}

fn standard_execution(
    prepared: &PreparedInput,
    report: &AnalysisReport,
    fallback_reason: Option<String>,
) -> ExecutionReport {
    ExecutionReport {
        mode: ExecutionMode::Standard,
        output: baseline_output(prepared, report),
        enrichment: Some(enrich(report)),
        reinforcement: None,
        fallback_reason,
    }
}

fn field_aware_execution(
    prepared: &PreparedInput,
    report: &AnalysisReport,
    outcome: ReinforcementOutcome,
) -> ExecutionReport {
    let mut output = baseline_output(prepared, report);
    if let Value::Object(map) = &mut output {
        map.insert("reinforcement".to_string(), json!(outcome));
    }
    ExecutionReport {
        mode: ExecutionMode::FieldAware,
        output,
        enrichment: Some(enrich(report)),
        reinforcement: Some(outcome),
        fallback_reason: None,
    }
}

/// `0.6 × completeness + 0.4 × mode match − penalties`, clipped to [0, 1].
pub fn quality_score(
    stages: &[StageOutput],
    mode_used: ExecutionMode,
    recommended: ExecutionMode,
    penalties: &[QualityPenalty],
) -> f64 {
    let completeness = if stages.is_empty() {
        0.0
    } else {
        stages
            .iter()
            .map(|s| match s.status {
                StageStatus::Completed => 1.0,
                StageStatus::Degraded => 0.75,
                StageStatus::FellBack => 0.5,
            })
            .sum::<f64>()
            / PipelineStage::ALL.len() as f64
    };
    let mode_match = if mode_used == recommended { 1.0 } else { 0.0 };
    let penalty: f64 = penalties.iter().map(QualityPenalty::weight).sum();

    (COMPLETENESS_WEIGHT * completeness + MODE_MATCH_WEIGHT * mode_match - penalty).clamp(0.0, 1.0)
}
