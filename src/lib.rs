//! Fieldguard - Field-State Monitor and Adaptive Processing Controller
//!
//! Fieldguard watches the variance of a session's field (a set of named
//! component metrics), classifies it as STABLE, WATCH or BREACH, and runs a
//! background optimizer per session that publishes a corrective action every
//! tick. A three-stage processing pipeline reads the latest action without
//! blocking and adapts its execution mode to it.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): sampler, tracker, selector, optimizer,
//!   pipeline and the per-session monitor
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fieldguard::{FieldConfig, FieldMonitor, InMemorySessionState, ProcessingRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let state = Arc::new(InMemorySessionState::new());
//!     let monitor = FieldMonitor::new(state);
//!     let session = uuid::Uuid::new_v4();
//!     let handle = monitor.start_optimizer(session, FieldConfig::default()).await?;
//!     let result = monitor.process(session, ProcessingRequest::new("hello")).await;
//!     println!("quality {:.2}", result.quality_score);
//!     handle.stop().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    ComponentTarget, Config, ExecutionMode, FieldConfig, FieldSample, LoggingConfig,
    OptimizationAction, PipelineConfig, ProcessingRequest, ProcessingResult, SessionMetrics,
    StabilityState, StabilityStatus, Strategy, Trend,
};
pub use domain::ports::{FieldProcessor, NullFieldProcessor, SessionStateProvider};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    ActionSnapshot, BackgroundOptimizer, FieldMonitor, FieldSampler, InMemorySessionState,
    OptimizerEvent, OptimizerHandle, ProcessingPipeline, StabilityTracker, StrategySelector,
};
