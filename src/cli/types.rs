//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::config::ConfigArgs;
use super::commands::process::ProcessArgs;
use super::commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "fieldguard")]
#[command(about = "Field-state monitor and adaptive processing controller", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .fieldguard/
    #[arg(short, long, global = true, env = "FIELDGUARD_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Simulate a session and print its stability timeline
    Run(RunArgs),

    /// Process one request against a short-lived session
    Process(ProcessArgs),

    /// Inspect and validate configuration
    Config(ConfigArgs),
}
