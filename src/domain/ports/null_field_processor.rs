//! Null field processor implementation.
//!
//! Used when no external field processor is wired in but the pipeline
//! requires a FieldProcessor implementation.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ReinforcementDirective, ReinforcementOutcome, ReinforcementTarget};
use super::FieldProcessor;

/// A field processor that acknowledges every directive without side effects.
#[derive(Debug, Clone, Default)]
pub struct NullFieldProcessor;

impl NullFieldProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FieldProcessor for NullFieldProcessor {
    async fn reinforce(
        &self,
        directive: &ReinforcementDirective,
    ) -> DomainResult<ReinforcementOutcome> {
        let applied = match &directive.target {
            ReinforcementTarget::Component { amplification, .. } => *amplification,
            ReinforcementTarget::Field { correction } => *correction,
        };
        Ok(ReinforcementOutcome {
            target: directive.target.clone(),
            applied,
            acknowledged: true,
        })
    }
}
