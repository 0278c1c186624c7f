//! In-memory session state provider.
//!
//! Backs the CLI simulation and embedding scenarios where session metrics are
//! pushed in by the host instead of read from storage.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::SessionMetrics;
use crate::domain::ports::SessionStateProvider;

#[derive(Debug, Default)]
pub struct InMemorySessionState {
    sessions: RwLock<HashMap<Uuid, SessionMetrics>>,
}

impl InMemorySessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a session's metrics.
    pub async fn set(&self, session_id: Uuid, metrics: SessionMetrics) {
        self.sessions.write().await.insert(session_id, metrics);
    }

    /// Update one metric, creating the session if needed.
    pub async fn update(&self, session_id: Uuid, name: &str, value: f64) {
        self.sessions
            .write()
            .await
            .entry(session_id)
            .or_default()
            .set(name, value);
    }

    pub async fn remove(&self, session_id: Uuid) -> Option<SessionMetrics> {
        self.sessions.write().await.remove(&session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStateProvider for InMemorySessionState {
    async fn session_metrics(&self, session_id: Uuid) -> Option<SessionMetrics> {
        self.sessions.read().await.get(&session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_session_has_no_metrics() {
        let state = InMemorySessionState::new();
        assert!(state.session_metrics(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_set_update_remove() {
        let state = InMemorySessionState::new();
        let id = Uuid::new_v4();

        state.set(id, SessionMetrics::new().with("coherence", 0.8)).await;
        state.update(id, "activity_rate", 0.4).await;

        let metrics = state.session_metrics(id).await.unwrap();
        assert_eq!(metrics.get("coherence"), Some(0.8));
        assert_eq!(metrics.get("activity_rate"), Some(0.4));
        assert_eq!(state.session_count().await, 1);

        assert!(state.remove(id).await.is_some());
        assert!(state.session_metrics(id).await.is_none());
    }
}
