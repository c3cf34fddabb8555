//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/tickerlens/config.toml)
//! 3. Project config (.tickerlens/config.toml)
//! 4. Environment variables (TICKERLENS_* prefix, `__` between sections)

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{LensError, Result};

const ENV_PREFIX: &str = "TICKERLENS_";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let figment = Self::figment(
            Self::global_config_path().as_deref(),
            &Self::project_config_path(),
        );
        Self::extract(figment)
    }

    /// Load configuration from a specific file (plus env overrides)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        Self::extract(Self::figment(None, path))
    }

    fn figment(global: Option<&Path>, project: &Path) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = global
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(global_path));
        }

        if project.exists() {
            debug!("Loading project config from: {}", project.display());
            figment = figment.merge(Toml::file(project));
        }

        // TICKERLENS_LLM__MODEL -> llm.model
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<Config> {
        let config: Config = figment
            .extract()
            .map_err(|e| LensError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Platform config directory (~/.config/tickerlens/ on Linux)
    pub fn global_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tickerlens").map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(".tickerlens")
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());
    }

    /// Show current effective configuration
    pub fn show_config(config: &Config, as_json: bool) -> Result<()> {
        if as_json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| LensError::Config(e.to_string()))?
            );
        }

        Ok(())
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write the global config file, keeping an existing one unless `force`
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            LensError::Config("Cannot determine global config directory".to_string())
        })?;
        Self::write_default(&global_dir, force)?;
        Ok(global_dir)
    }

    /// Create `.tickerlens/` with a default config
    pub fn init_project(force: bool) -> Result<PathBuf> {
        let project_dir = Self::project_dir();
        Self::write_default(&project_dir, force)?;
        Ok(project_dir)
    }

    fn write_default(dir: &Path, force: bool) -> Result<()> {
        fs::create_dir_all(dir)?;

        let config_path = dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_config())?;
            info!("Created config: {}", config_path.display());
        } else {
            info!("Config exists: {}", config_path.display());
        }
        Ok(())
    }

    /// Default config content (TOML)
    fn default_config() -> String {
        r#"# TickerLens Configuration
# Project settings in .tickerlens/config.toml override the global file.
# Any key can also be set with TICKERLENS_<SECTION>__<KEY>, e.g. TICKERLENS_LLM__MODEL.

version = "1.0"

[llm]
provider = "openai"
model = "gpt-4o-mini"
# api_base = "https://api.deepseek.com/v1"
# api_key is read from OPENAI_API_KEY when unset
temperature = 0.3
top_p = 0.9
max_tokens = 4000
max_retries = 2

[segmentation]
chunk_size = 8000
overlap = 200
max_segments = 6
strategy = "sentence"
preserve_context = true

[storage]
database_path = ".tickerlens/executions.db"
retention_days = 90

[data]
snapshot_dir = "data"

[notify]
enabled = false

# [[notify.webhooks]]
# name = "desk"
# url = "https://hooks.example.com/desk"

# [[models]]
# name = "local-model"
# context_window = 32000
# max_output_tokens = 4096
# input_rate = 0.0005
# output_rate = 0.0015
"#
        .to_string()
    }
}
