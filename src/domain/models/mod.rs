pub mod config;
pub mod field;
pub mod processing;
pub mod stability;
pub mod strategy;

pub use config::{Aggregation, ComponentTarget, Config, FieldConfig, LoggingConfig, PipelineConfig};
pub use field::{ComponentDeficit, FieldSample, SessionMetrics};
pub use processing::{
    AnalysisReport, Difficulty, Enrichment, ExecutionMode, ExecutionReport, PipelineStage,
    PipelineTelemetry, PreparedInput, ProcessingRequest, ProcessingResult, QualityPenalty,
    ReinforcementDirective, ReinforcementOutcome, ReinforcementTarget, StageDetail, StageOutput,
    StageStatus, StructureKind,
};
pub use stability::{BreachTrigger, StabilityState, StabilityStatus, Trend};
pub use strategy::{OptimizationAction, Strategy, StrategyKind, MAX_PRIORITY};
