//! `fieldguard run`: simulate a session and print its stability timeline.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::cli::display::{colorize_status, colorize_trend, detail_table, list_table, score_bar};
use crate::cli::output::{output, CommandOutput};
use crate::cli::simulation::Profile;
use crate::domain::models::{Config, OptimizationAction, ProcessingRequest};
use crate::services::{
    FieldMonitor, InMemorySessionState, OptimizerAnalytics, OptimizerEvent, OptimizerStats,
    PipelineStats,
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Session profile to simulate
    #[arg(short, long, value_enum, default_value = "degrading")]
    pub profile: Profile,

    /// Number of optimizer ticks to run
    #[arg(short, long, default_value = "20")]
    pub ticks: u64,

    /// Override the configured tick interval
    #[arg(long)]
    pub tick_interval_ms: Option<u64>,

    /// Requests pushed through the pipeline after every tick
    #[arg(long, default_value = "1")]
    pub requests_per_tick: usize,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub session_id: Uuid,
    pub profile: Profile,
    pub timeline: Vec<OptimizationAction>,
    pub optimizer: OptimizerStats,
    pub analytics: OptimizerAnalytics,
    pub pipeline: PipelineStats,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut table =
            list_table(&["tick", "status", "score", "", "trend", "strategy", "prio", "conf"]);
        for action in &self.timeline {
            let state = &action.stability;
            let priority = if action.escalated {
                format!("{}!", action.priority)
            } else {
                action.priority.to_string()
            };
            table.add_row(vec![
                action.tick.to_string(),
                colorize_status(state.status).to_string(),
                format!("{:.3}", state.score),
                score_bar(state.score, 20),
                colorize_trend(state.trend).to_string(),
                action.strategy.kind().to_string(),
                priority,
                format!("{:.2}", action.confidence),
            ]);
        }

        let summary = detail_table(&[
            ("session", self.session_id.to_string()),
            ("ticks", self.optimizer.total_ticks.to_string()),
            ("breaches", self.optimizer.breaches.to_string()),
            ("breach ticks", self.optimizer.breach_ticks.to_string()),
            ("escalations", self.optimizer.escalations.to_string()),
            ("mean score", format!("{:.3}", self.analytics.mean_score)),
            ("mean variance", format!("{:.3}", self.analytics.mean_variance)),
            ("requests", self.pipeline.total_requests.to_string()),
            ("mean quality", format!("{:.3}", self.pipeline.mean_quality())),
        ]);

        format!("{table}\n\n{summary}")
    }
}

pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<()> {
    let result = run_simulation(&args, config).await?;
    output(&result, json_mode);
    Ok(())
}

/// Drive a simulated session for `args.ticks` ticks.
pub async fn run_simulation(args: &RunArgs, config: Config) -> Result<RunOutput> {
    let mut field = config.field;
    if let Some(ms) = args.tick_interval_ms {
        field.tick_interval_ms = ms;
        field.remediation_interval_ms = None;
    }
    field.action_log_capacity = field
        .action_log_capacity
        .max(usize::try_from(args.ticks).unwrap_or(usize::MAX));

    let session_id = Uuid::new_v4();
    let state = Arc::new(InMemorySessionState::new());
    state.set(session_id, args.profile.metrics(0)).await;

    let monitor = FieldMonitor::new(state.clone()).with_pipeline_config(config.pipeline);
    let handle = monitor
        .start_optimizer(session_id, field)
        .await
        .context("Failed to start optimizer")?;
    let mut events = handle.subscribe();

    tracing::info!(
        session_id = %session_id,
        profile = ?args.profile,
        ticks = args.ticks,
        "simulation started"
    );

    loop {
        match events.recv().await {
            Ok(OptimizerEvent::TickCompleted { tick, .. }) => {
                state.set(session_id, args.profile.metrics(tick)).await;
                for i in 0..args.requests_per_tick {
                    let request = ProcessingRequest::new(format!("simulated request {tick}-{i}"))
                        .with_aspects(["analytical", "observer"]);
                    monitor.process(session_id, request).await;
                }
                if tick >= args.ticks {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "simulation lagged behind optimizer events");
            }
            Err(RecvError::Closed) => break,
        }
    }

    let timeline: Vec<OptimizationAction> = handle
        .action_log()
        .await
        .into_iter()
        .filter(|a| a.tick <= args.ticks)
        .collect();
    let analytics = OptimizerAnalytics::from_actions(&timeline);
    let pipeline = monitor.pipeline_stats(session_id).await?;

    let optimizer = handle.stop().await;

    Ok(RunOutput {
        session_id,
        profile: args.profile,
        timeline,
        optimizer,
        analytics,
        pipeline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::StabilityStatus;

    fn args(profile: Profile, ticks: u64) -> RunArgs {
        RunArgs {
            profile,
            ticks,
            tick_interval_ms: Some(10),
            requests_per_tick: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_run_stays_stable() {
        let result = run_simulation(&args(Profile::Steady, 8), Config::default()).await.unwrap();
        assert_eq!(result.timeline.len(), 8);
        assert!(result.timeline.iter().all(|a| a.stability.status == StabilityStatus::Stable));
        assert!(result.pipeline.total_requests >= 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overload_run_breaches() {
        let result = run_simulation(&args(Profile::Overload, 5), Config::default()).await.unwrap();
        assert!(result.optimizer.breaches >= 1);
        assert!(result.timeline.iter().any(|a| a.stability.is_breach()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_output_renders() {
        let result = run_simulation(&args(Profile::Oscillating, 4), Config::default())
            .await
            .unwrap();
        let human = result.to_human();
        assert!(human.contains("TICK"));
        let json = result.to_json();
        assert_eq!(json["profile"], "oscillating");
    }
}
