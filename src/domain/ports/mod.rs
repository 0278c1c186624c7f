//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces of the external collaborators the
//! monitor depends on:
//! - SessionStateProvider: read-only access to a session's metrics
//! - FieldProcessor: applies reinforcement requested by field-aware execution
//!
//! Services depend on these traits, never on concrete adapters.

pub mod field_processor;
pub mod null_field_processor;
pub mod session_state;

pub use field_processor::FieldProcessor;
pub use null_field_processor::NullFieldProcessor;
pub use session_state::SessionStateProvider;
