//! `fieldguard config`: show and validate configuration.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::display::detail_table;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Validate a configuration file, or the effective configuration
    Validate {
        /// File to validate instead of the loaded configuration
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
pub struct ConfigShowOutput {
    pub config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config)
            .unwrap_or_else(|e| format!("<unrenderable config: {e}>"))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigValidateOutput {
    pub valid: bool,
    pub source: String,
    pub components: usize,
    pub tick_interval_ms: u64,
    pub remediation_interval_ms: u64,
}

impl CommandOutput for ConfigValidateOutput {
    fn to_human(&self) -> String {
        let table = detail_table(&[
            ("source", self.source.clone()),
            ("components", self.components.to_string()),
            ("tick interval", format!("{}ms", self.tick_interval_ms)),
            ("remediation interval", format!("{}ms", self.remediation_interval_ms)),
        ]);
        format!("{} configuration is valid\n{table}", console::style("✓").green())
    }
}

pub async fn execute(args: ConfigArgs, config: Config, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommands::Show => output(&ConfigShowOutput { config }, json_mode),
        ConfigCommands::Validate { file } => {
            let result = validate(file, config)?;
            output(&result, json_mode);
        }
    }
    Ok(())
}

fn validate(file: Option<PathBuf>, loaded: Config) -> Result<ConfigValidateOutput> {
    let (config, source) = match file {
        Some(path) => {
            let config = ConfigLoader::load_from_file(&path)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?;
            (config, path.display().to_string())
        }
        None => {
            ConfigLoader::validate(&loaded).context("Invalid configuration")?;
            (loaded, "effective".to_string())
        }
    };

    Ok(ConfigValidateOutput {
        valid: true,
        source,
        components: config.field.components.len(),
        tick_interval_ms: config.field.tick_interval_ms,
        remediation_interval_ms: config.field.remediation_interval_ms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_effective_config() {
        let result = validate(None, Config::default()).unwrap();
        assert!(result.valid);
        assert_eq!(result.source, "effective");
        assert_eq!(result.tick_interval_ms, 100);
        assert_eq!(result.remediation_interval_ms, 50);
    }

    #[test]
    fn test_validate_rejects_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "field:\n  breach_threshold: 0.9\n").unwrap();
        let err = validate(Some(file.path().to_path_buf()), Config::default()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid configuration"));
    }

    #[test]
    fn test_show_renders_yaml() {
        let out = ConfigShowOutput { config: Config::default() };
        let yaml = out.to_human();
        assert!(yaml.contains("tick_interval_ms: 100"));
        assert_eq!(out.to_json()["pipeline"]["timeout_ms"], 250);
    }
}
