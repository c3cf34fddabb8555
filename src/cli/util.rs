//! CLI Common Utilities
//!
//! Shared initialization for command handlers: configuration, the database
//! and the stores built on top of it.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::{Config, ConfigLoader};
use crate::storage::{Database, ExecutionStore, RunStore, SharedDatabase};
use crate::types::{LensError, Result};

/// Output format shared by the reporting commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format '{}'. Valid values: text, json", s)),
        }
    }
}

/// Command execution context
///
/// Commands that touch storage load this once; the database is opened (and
/// its schema initialized) at the configured path.
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub db: SharedDatabase,
}

impl CommandContext {
    /// Load config from the standard chain, or from `config_path` when given
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let db = Database::open(&config.storage.database_path)?;
        Ok(Self {
            config,
            db: Arc::new(db),
        })
    }

    pub fn executions(&self) -> ExecutionStore {
        ExecutionStore::new(self.db.clone())
    }

    pub fn runs(&self) -> RunStore {
        RunStore::new(self.db.clone())
    }
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(LensError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            ConfigLoader::load_from_file(path)
        }
        None => ConfigLoader::load(),
    }
}

/// `YYYY-MM-DD`
pub fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}'. Expected YYYY-MM-DD", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2026-03-01"),
            Ok(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
        );
        assert!(parse_date("03/01/2026").is_err());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(dir.path().join("absent.toml").as_path())).unwrap_err();
        assert!(matches!(err, LensError::Config(_)));
    }
}
