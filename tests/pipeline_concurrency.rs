//! Concurrent request processing while the optimizer ticks.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fieldguard::domain::models::{FieldConfig, PipelineStage, ProcessingRequest};
use fieldguard::services::{FieldMonitor, InMemorySessionState};
use futures::future::join_all;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_concurrent_requests_all_complete() {
    common::setup_test_logging();

    let id = Uuid::new_v4();
    let state = Arc::new(InMemorySessionState::new());
    state.set(id, common::stable_metrics()).await;

    let monitor = Arc::new(FieldMonitor::new(state.clone()));
    let handle = monitor.start_optimizer(id, FieldConfig::with_tick_interval(5)).await.unwrap();

    // let a few ticks publish before the burst
    tokio::time::sleep(Duration::from_millis(30)).await;

    let tasks = (0..100).map(|i| {
        let monitor = Arc::clone(&monitor);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if i % 10 == 0 {
                state.update(id, "coherence", 0.4 + f64::from(i) / 250.0).await;
            }
            let request = ProcessingRequest::new(format!("request number {i} with some words"))
                .with_aspects(["analytical", "creative"]);
            monitor.process(id, request).await
        })
    });

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("processing task panicked"))
        .collect();

    assert_eq!(results.len(), 100);
    let ids: HashSet<_> = results.iter().map(|r| r.request_id).collect();
    assert_eq!(ids.len(), 100);
    for result in &results {
        assert_eq!(result.session_id, id);
        assert_eq!(result.stage_outputs.len(), 3);
        assert_eq!(result.stage_outputs[0].stage, PipelineStage::Preparation);
        assert!((0.0..=1.0).contains(&result.quality_score));
        assert!(result.action_tick >= 1);
    }

    let stats = monitor.pipeline_stats(id).await.unwrap();
    assert_eq!(stats.total_requests, 100);

    monitor.stop_optimizer(handle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_are_isolated() {
    let state = Arc::new(InMemorySessionState::new());
    let calm = Uuid::new_v4();
    let stormy = Uuid::new_v4();
    state.set(calm, common::stable_metrics()).await;
    state.set(stormy, common::breaching_metrics()).await;

    let monitor = FieldMonitor::new(state);
    let a = monitor.start_optimizer(calm, FieldConfig::with_tick_interval(5)).await.unwrap();
    let b = monitor.start_optimizer(stormy, FieldConfig::with_tick_interval(5)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(!monitor.current_stability(calm).await.is_breach());
    assert!(monitor.current_stability(stormy).await.is_breach());

    monitor.process(calm, ProcessingRequest::new("one")).await;
    assert_eq!(monitor.pipeline_stats(calm).await.unwrap().total_requests, 1);
    assert_eq!(monitor.pipeline_stats(stormy).await.unwrap().total_requests, 0);

    monitor.shutdown();
    a.stop().await;
    b.stop().await;
}
