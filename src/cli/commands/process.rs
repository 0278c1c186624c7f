//! `fieldguard process`: run one request through the pipeline.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::cli::display::{colorize_status, detail_table, list_table, score_bar};
use crate::cli::output::{output, truncate, CommandOutput};
use crate::cli::simulation::Profile;
use crate::domain::models::{
    Config, ProcessingRequest, ProcessingResult, StabilityState, StageDetail,
};
use crate::services::{FieldMonitor, InMemorySessionState, OptimizerEvent};

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Request content; JSON is parsed, anything else is sent as text
    pub content: Option<String>,

    /// Read the request from a file (`-` for stdin)
    #[arg(short, long, conflicts_with = "content")]
    pub file: Option<PathBuf>,

    /// Aspect to evaluate (repeatable)
    #[arg(short, long = "aspect")]
    pub aspects: Vec<String>,

    /// Session profile the request runs under
    #[arg(short, long, value_enum, default_value = "steady")]
    pub profile: Profile,

    /// Optimizer ticks to wait for before processing
    #[arg(long, default_value = "3")]
    pub warmup_ticks: u64,
}

#[derive(Debug, Serialize)]
pub struct ProcessOutput {
    pub stability: StabilityState,
    pub result: ProcessingResult,
}

impl CommandOutput for ProcessOutput {
    fn to_human(&self) -> String {
        let result = &self.result;
        let mut stages = list_table(&["stage", "status", "elapsed", "detail"]);
        for stage in &result.stage_outputs {
            let detail = match &stage.detail {
                StageDetail::Preparation(p) => {
                    format!("{} chars, {} aspects", p.content_length, p.aspects.len())
                }
                StageDetail::Analysis(a) => format!(
                    "{:?} complexity {:.2} ({:?}), recommends {}",
                    a.structure, a.complexity, a.difficulty, a.recommended_mode
                ),
                StageDetail::AdaptiveExecution(e) => match &e.fallback_reason {
                    Some(reason) => format!("{} after fallback: {reason}", e.mode),
                    None => e.mode.to_string(),
                },
            };
            stages.add_row(vec![
                stage.stage.to_string(),
                format!("{:?}", stage.status).to_lowercase(),
                format!("{:?}", stage.elapsed),
                truncate(&detail, 72),
            ]);
        }

        let penalties = if result.penalties.is_empty() {
            "-".to_string()
        } else {
            result
                .penalties
                .iter()
                .map(|p| format!("{p:?}"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let summary = detail_table(&[
            ("request", result.request_id.to_string()),
            (
                "field",
                format!(
                    "{} ({:.3})",
                    colorize_status(self.stability.status),
                    self.stability.score
                ),
            ),
            ("strategy", format!("{} @ tick {}", result.strategy, result.action_tick)),
            ("mode", format!("{} (recommended {})", result.mode_used, result.recommended_mode)),
            (
                "quality",
                format!(
                    "{:.3} {}",
                    result.quality_score,
                    score_bar(result.quality_score, 20)
                ),
            ),
            ("penalties", penalties),
            ("insights", result.insights.join(", ")),
            ("duration", format!("{:?}", result.duration)),
        ]);

        format!("{stages}\n\n{summary}")
    }
}

pub async fn execute(args: ProcessArgs, config: Config, json_mode: bool) -> Result<()> {
    let raw = read_input(&args)?;
    let result = process_once(&args, raw, config).await?;
    output(&result, json_mode);
    Ok(())
}

fn read_input(args: &ProcessArgs) -> Result<String> {
    match (&args.content, &args.file) {
        (Some(content), _) => Ok(content.clone()),
        (None, Some(path)) if path.as_os_str() == "-" => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read request from stdin")?;
            Ok(buf)
        }
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request from {}", path.display())),
        (None, None) => bail!("Provide request content or --file"),
    }
}

/// Parse raw input into a request. JSON goes through the request parser;
/// plain text becomes the content.
pub fn build_request(raw: &str, aspects: &[String]) -> ProcessingRequest {
    let mut request = if serde_json::from_str::<serde_json::Value>(raw).is_ok() {
        ProcessingRequest::from_json(raw)
    } else {
        ProcessingRequest::new(raw.trim_end().to_string())
    };
    if !aspects.is_empty() {
        request.aspects = aspects.to_vec();
    }
    request
}

/// Warm up a short-lived session, process one request, then stop.
pub async fn process_once(
    args: &ProcessArgs,
    raw: String,
    config: Config,
) -> Result<ProcessOutput> {
    let request = build_request(&raw, &args.aspects);

    let session_id = Uuid::new_v4();
    let state = Arc::new(InMemorySessionState::new());
    state.set(session_id, args.profile.metrics(0)).await;

    let monitor = FieldMonitor::new(state.clone()).with_pipeline_config(config.pipeline);
    let handle = monitor
        .start_optimizer(session_id, config.field)
        .await
        .context("Failed to start optimizer")?;
    let mut events = handle.subscribe();

    let mut seen = 0;
    while seen < args.warmup_ticks {
        match events.recv().await {
            Ok(OptimizerEvent::TickCompleted { tick, .. }) => {
                seen += 1;
                state.set(session_id, args.profile.metrics(tick)).await;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }

    let stability = monitor.current_stability(session_id).await;
    let result = monitor.process(session_id, request).await;
    monitor.stop_optimizer(handle).await;

    Ok(ProcessOutput { stability, result })
}
