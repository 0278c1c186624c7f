//! Domain layer for the fieldguard monitor
//!
//! This module contains the core models, errors and port traits.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{ConfigError, DomainError, DomainResult};
