//! Service layer: sampling, tracking, strategy selection, the per-session
//! optimizer loop and the request pipeline.

pub mod background_optimizer;
pub mod field_monitor;
pub mod field_sampler;
pub mod processing_pipeline;
pub mod session_state;
pub mod stability_tracker;
pub mod strategy_selector;

pub use background_optimizer::{
    ActionSnapshot, BackgroundOptimizer, OptimizerAnalytics, OptimizerEvent, OptimizerHandle,
    OptimizerStats,
};
pub use field_monitor::FieldMonitor;
pub use field_sampler::{
    ComponentDeviation, FieldSampler, QuadraticDeviation, VarianceAggregator, WeightedDeviation,
};
pub use processing_pipeline::{PipelineAnalytics, PipelineStats, ProcessingPipeline, StageStats};
pub use session_state::InMemorySessionState;
pub use stability_tracker::{Ewma, HistorySummary, ScoreSmoother, StabilityTracker};
pub use strategy_selector::StrategySelector;
