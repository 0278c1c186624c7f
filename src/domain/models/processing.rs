//! Request, stage and result types of the processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::strategy::StrategyKind;

/// One inbound unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub request_id: Uuid,
    pub content: Value,
    #[serde(default)]
    pub aspects: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// The raw request could not be parsed
    #[serde(default)]
    pub malformed: bool,
}

impl ProcessingRequest {
    pub fn new(content: impl Into<Value>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            content: content.into(),
            aspects: Vec::new(),
            metadata: BTreeMap::new(),
            malformed: false,
        }
    }

    pub fn with_aspects<I, S>(mut self, aspects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aspects = aspects.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a request from raw JSON.
    ///
    /// An object with a `content` key is read as a full request (`aspects` and
    /// `metadata` optional); any other JSON value becomes the content. Input that
    /// does not parse yields a request flagged `malformed` with null content.
    pub fn from_json(raw: &str) -> Self {
        let parsed: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = %err, "request is not valid JSON");
                let mut request = Self::new(Value::Null);
                request.malformed = true;
                return request;
            }
        };

        match parsed {
            Value::Object(mut map) if map.contains_key("content") => {
                let content = map.remove("content").unwrap_or(Value::Null);
                let mut request = Self::new(content);
                match map.remove("aspects") {
                    Some(Value::Array(items)) => {
                        request.aspects = items
                            .into_iter()
                            .map(|item| match item {
                                Value::String(s) => s,
                                other => other.to_string(),
                            })
                            .collect();
                    }
                    Some(Value::Null) | None => {}
                    Some(_) => request.malformed = true,
                }
                match map.remove("metadata") {
                    Some(Value::Object(meta)) => request.metadata = meta.into_iter().collect(),
                    Some(Value::Null) | None => {}
                    Some(_) => request.malformed = true,
                }
                request
            }
            other => Self::new(other),
        }
    }
}

/// Execution mode chosen by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Full processing plus per-component reinforcement
    FieldAware,
    /// Cheaper path that skips optional enrichment
    Synchronized,
    /// Baseline
    Standard,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FieldAware => "field_aware",
            Self::Synchronized => "synchronized",
            Self::Standard => "standard",
        }
    }

    pub const ALL: [Self; 3] = [Self::FieldAware, Self::Synchronized, Self::Standard];
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Preparation,
    Analysis,
    AdaptiveExecution,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparation => "preparation",
            Self::Analysis => "analysis",
            Self::AdaptiveExecution => "adaptive_execution",
        }
    }

    pub const ALL: [Self; 3] = [Self::Preparation, Self::Analysis, Self::AdaptiveExecution];
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Ran as intended
    Completed,
    /// Ran on substituted input
    Degraded,
    /// Fell back to the standard path
    FellBack,
}

/// Reason a result's quality was reduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum QualityPenalty {
    MalformedRequest,
    MissingContent,
    EmptyContent,
    InvalidAspect(String),
    Timeout,
    ExecutionFallback(String),
}

impl QualityPenalty {
    pub fn weight(&self) -> f64 {
        match self {
            Self::MalformedRequest => 0.3,
            Self::MissingContent => 0.2,
            Self::EmptyContent => 0.1,
            Self::InvalidAspect(_) => 0.05,
            Self::Timeout => 0.25,
            Self::ExecutionFallback(_) => 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    Text,
    Structured,
    Sequential,
    Scalar,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Output of the preparation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedInput {
    pub content: Value,
    pub aspects: Vec<String>,
    pub content_length: usize,
    /// Content was replaced by a minimal valid form
    pub substituted: bool,
}

/// Output of the analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub structure: StructureKind,
    /// Words, keys or items depending on the structure
    pub size: usize,
    pub nesting_depth: usize,
    pub complexity: f64,
    pub difficulty: Difficulty,
    pub aspect_compatibility: BTreeMap<String, f64>,
    pub recommended_mode: ExecutionMode,
    pub insights: Vec<String>,
}

/// Optional enrichment produced by the richer execution paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub dominant_aspect: Option<String>,
    pub insights: Vec<String>,
}

/// What a field-aware execution asks the field processor to reinforce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReinforcementTarget {
    Component { name: String, amplification: f64 },
    Field { correction: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinforcementDirective {
    pub session_id: Uuid,
    pub request_id: Uuid,
    pub target: ReinforcementTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinforcementOutcome {
    pub target: ReinforcementTarget,
    /// Amount actually applied
    pub applied: f64,
    pub acknowledged: bool,
}

/// Output of the adaptive execution stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub mode: ExecutionMode,
    pub output: Value,
    pub enrichment: Option<Enrichment>,
    pub reinforcement: Option<ReinforcementOutcome>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageDetail {
    Preparation(PreparedInput),
    Analysis(AnalysisReport),
    AdaptiveExecution(ExecutionReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: PipelineStage,
    pub status: StageStatus,
    pub elapsed: Duration,
    pub detail: StageDetail,
}

/// Result of one pipeline invocation. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub request_id: Uuid,
    pub session_id: Uuid,
    pub stage_outputs: Vec<StageOutput>,
    pub quality_score: f64,
    pub mode_used: ExecutionMode,
    pub recommended_mode: ExecutionMode,
    /// Tick of the action snapshot the request ran under
    pub action_tick: u64,
    pub strategy: StrategyKind,
    pub penalties: Vec<QualityPenalty>,
    pub insights: Vec<String>,
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
}

impl ProcessingResult {
    pub fn stage(&self, stage: PipelineStage) -> Option<&StageOutput> {
        self.stage_outputs.iter().find(|s| s.stage == stage)
    }

    pub fn execution(&self) -> Option<&ExecutionReport> {
        self.stage_outputs.iter().find_map(|s| match &s.detail {
            StageDetail::AdaptiveExecution(report) => Some(report),
            _ => None,
        })
    }

    pub fn timed_out(&self) -> bool {
        self.penalties.contains(&QualityPenalty::Timeout)
    }
}

/// Per-request telemetry fed back into the next sampling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTelemetry {
    pub session_id: Uuid,
    pub quality_score: f64,
    pub mode_used: ExecutionMode,
    pub duration: Duration,
    pub timed_out: bool,
    pub at: DateTime<Utc>,
}

impl From<&ProcessingResult> for PipelineTelemetry {
    fn from(result: &ProcessingResult) -> Self {
        Self {
            session_id: result.session_id,
            quality_score: result.quality_score,
            mode_used: result.mode_used,
            duration: result.duration,
            timed_out: result.timed_out(),
            at: result.completed_at,
        }
    }
}
