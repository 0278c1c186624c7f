//! Field processor port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ReinforcementDirective, ReinforcementOutcome};

/// Applies reinforcement on behalf of field-aware execution.
///
/// Errors are never fatal to a request: the pipeline falls back to the
/// standard execution path and records a quality penalty.
#[async_trait]
pub trait FieldProcessor: Send + Sync {
    /// Apply one reinforcement directive.
    ///
    /// # Errors
    /// Returns error if the processor is unavailable or rejects the directive.
    async fn reinforce(
        &self,
        directive: &ReinforcementDirective,
    ) -> DomainResult<ReinforcementOutcome>;
}
