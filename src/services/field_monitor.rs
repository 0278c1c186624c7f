//! Field monitor.
//!
//! Entry point that owns one optimizer and one pipeline per session. Sessions
//! are isolated: each has its own history, snapshot and telemetry channel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FieldConfig, PipelineConfig, ProcessingRequest, ProcessingResult, StabilityState,
};
use crate::domain::ports::{FieldProcessor, NullFieldProcessor, SessionStateProvider};
use crate::services::background_optimizer::{ActionSnapshot, BackgroundOptimizer, OptimizerHandle};
use crate::services::field_sampler::VarianceAggregator;
use crate::services::processing_pipeline::{PipelineStats, ProcessingPipeline};
use crate::services::stability_tracker::ScoreSmoother;

struct SessionEntry {
    snapshot: ActionSnapshot,
    pipeline: Arc<ProcessingPipeline>,
    cancel: CancellationToken,
}

impl SessionEntry {
    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Registry of per-session optimizers and pipelines.
pub struct FieldMonitor {
    provider: Arc<dyn SessionStateProvider>,
    processor: Arc<dyn FieldProcessor>,
    pipeline_config: PipelineConfig,
    aggregator: Option<Arc<dyn VarianceAggregator>>,
    smoother: Option<Arc<dyn ScoreSmoother>>,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    shutdown: CancellationToken,
}

impl FieldMonitor {
    pub fn new(provider: Arc<dyn SessionStateProvider>) -> Self {
        Self {
            provider,
            processor: Arc::new(NullFieldProcessor::new()),
            pipeline_config: PipelineConfig::default(),
            aggregator: None,
            smoother: None,
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn FieldProcessor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = config;
        self
    }

    /// Aggregate variance with `aggregator` in every session started from now
    /// on, overriding the configured aggregation.
    pub fn with_aggregator(mut self, aggregator: Arc<dyn VarianceAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Smooth scores with `smoother` in every session started from now on.
    pub fn with_smoother(mut self, smoother: Arc<dyn ScoreSmoother>) -> Self {
        self.smoother = Some(smoother);
        self
    }

    /// Start the optimizer for a session.
    ///
    /// The configuration is validated first; an invalid one means no
    /// optimizer is started. A stopped session can be started again.
    pub async fn start_optimizer(
        &self,
        session_id: Uuid,
        config: FieldConfig,
    ) -> DomainResult<OptimizerHandle> {
        config.validate()?;

        let mut sessions = self.sessions.write().await;
        if sessions.get(&session_id).is_some_and(SessionEntry::is_running) {
            return Err(DomainError::OptimizerAlreadyRunning(session_id));
        }

        let cancel = self.shutdown.child_token();
        let (telemetry_tx, telemetry_rx) =
            mpsc::channel(self.pipeline_config.telemetry_buffer.max(1));

        let pipeline_budget =
            std::time::Duration::from_millis(self.pipeline_config.timeout_ms.max(1));
        let mut optimizer = BackgroundOptimizer::new(session_id, config, Arc::clone(&self.provider))
            .with_telemetry(telemetry_rx, pipeline_budget)
            .with_cancellation(cancel.clone());
        if let Some(aggregator) = &self.aggregator {
            optimizer = optimizer.with_aggregator(Arc::clone(aggregator));
        }
        if let Some(smoother) = &self.smoother {
            optimizer = optimizer.with_smoother(Arc::clone(smoother));
        }
        let snapshot = optimizer.snapshot();

        let pipeline = ProcessingPipeline::new(
            session_id,
            snapshot.clone(),
            Arc::clone(&self.processor),
            self.pipeline_config.clone(),
        )
        .with_telemetry(telemetry_tx);

        sessions.insert(
            session_id,
            SessionEntry {
                snapshot,
                pipeline: Arc::new(pipeline),
                cancel,
            },
        );
        drop(sessions);

        tracing::info!(session_id = %session_id, "session optimizer registered");
        Ok(optimizer.spawn())
    }

    /// Stop a session's optimizer and wait for its in-flight tick.
    ///
    /// The session keeps its last published state and pipeline.
    pub async fn stop_optimizer(&self, handle: OptimizerHandle) {
        let session_id = handle.session_id();
        let stats = handle.stop().await;
        tracing::info!(
            session_id = %session_id,
            total_ticks = stats.total_ticks,
            "session optimizer stopped"
        );
    }

    /// Latest stability state of a session; neutral for unknown sessions.
    pub async fn current_stability(&self, session_id: Uuid) -> StabilityState {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map_or_else(StabilityState::neutral, |entry| entry.snapshot.latest().stability.clone())
    }

    /// Process a request for a session. Unknown sessions run under the
    /// initial action and are not tracked.
    pub async fn process(&self, session_id: Uuid, request: ProcessingRequest) -> ProcessingResult {
        let pipeline = self.sessions.read().await.get(&session_id).map(|e| Arc::clone(&e.pipeline));

        match pipeline {
            Some(pipeline) => pipeline.process(request).await,
            None => {
                tracing::debug!(session_id = %session_id, "processing for unregistered session");
                ProcessingPipeline::new(
                    session_id,
                    ActionSnapshot::detached(),
                    Arc::clone(&self.processor),
                    self.pipeline_config.clone(),
                )
                .process(request)
                .await
            }
        }
    }

    pub async fn pipeline(&self, session_id: Uuid) -> Option<Arc<ProcessingPipeline>> {
        self.sessions.read().await.get(&session_id).map(|e| Arc::clone(&e.pipeline))
    }

    pub async fn pipeline_stats(&self, session_id: Uuid) -> DomainResult<PipelineStats> {
        match self.pipeline(session_id).await {
            Some(pipeline) => Ok(pipeline.stats().await),
            None => Err(DomainError::SessionNotFound(session_id)),
        }
    }

    pub async fn is_running(&self, session_id: Uuid) -> bool {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .is_some_and(SessionEntry::is_running)
    }

    pub async fn session_ids(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Forget a session. Its optimizer is cancelled if still running.
    pub async fn remove_session(&self, session_id: Uuid) -> DomainResult<()> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(&session_id)
            .ok_or(DomainError::SessionNotFound(session_id))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Cancel every optimizer started by this monitor.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for FieldMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMonitor")
            .field("pipeline_config", &self.pipeline_config)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
