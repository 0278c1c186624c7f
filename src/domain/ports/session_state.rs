//! Session state provider port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::models::SessionMetrics;

/// Read-only accessor for a session's current metrics.
///
/// Implemented by whatever owns session state (storage, an in-process model,
/// a simulation). The optimizer calls it once per tick.
#[async_trait]
pub trait SessionStateProvider: Send + Sync {
    /// Current metrics for the session.
    ///
    /// # Returns
    /// - `Some(SessionMetrics)` when the session state is readable
    /// - `None` when it is absent; the sampler substitutes a default-variance sample
    async fn session_metrics(&self, session_id: Uuid) -> Option<SessionMetrics>;
}
