//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/tickerlens/) and project (.tickerlens/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ai::provider::ModelInfo;
use crate::ai::segmentation::SegmentStrategy;
use crate::constants::{generation, retry, segmentation, store};
use crate::types::{LensError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Model backend settings
    pub llm: LlmConfig,

    /// Oversized input handling
    pub segmentation: SegmentationConfig,

    /// Execution store settings
    pub storage: StorageConfig,

    /// Market data source settings
    pub data: DataConfig,

    /// Report delivery settings
    pub notify: NotifyConfig,

    /// Extra model entries merged over the built-in registry
    pub models: Vec<ModelInfo>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            segmentation: SegmentationConfig::default(),
            storage: StorageConfig::default(),
            data: DataConfig::default(),
            notify: NotifyConfig::default(),
            models: Vec::new(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `LensError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(LensError::Config(format!(
                "llm.temperature must be between 0.0 and 1.0, got {}",
                self.llm.temperature
            )));
        }

        if !(0.0..=1.0).contains(&self.llm.top_p) {
            return Err(LensError::Config(format!(
                "llm.top_p must be between 0.0 and 1.0, got {}",
                self.llm.top_p
            )));
        }

        if self.llm.max_tokens == 0 {
            return Err(LensError::Config(
                "llm.max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.segmentation.overlap >= self.segmentation.chunk_size {
            return Err(LensError::Config(format!(
                "segmentation.overlap ({}) must be smaller than chunk_size ({})",
                self.segmentation.overlap, self.segmentation.chunk_size
            )));
        }

        if self.segmentation.max_segments == 0 {
            return Err(LensError::Config(
                "segmentation.max_segments must be greater than 0".to_string(),
            ));
        }

        if self.storage.retention_days == 0 {
            return Err(LensError::Config(
                "storage.retention_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend provider (openai)
    pub provider: String,

    /// Model name
    pub model: String,

    /// API base URL for OpenAI-compatible endpoints
    pub api_base: Option<String>,

    /// API key. Read from config or env, never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// 0.0-1.0
    pub temperature: f32,

    /// 0.0-1.0
    pub top_p: f32,

    /// Requested output tokens per call
    pub max_tokens: u32,

    /// Retries after the first attempt for transient failures
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_base: None,
            api_key: None,
            temperature: generation::DEFAULT_TEMPERATURE,
            top_p: generation::DEFAULT_TOP_P,
            max_tokens: generation::DEFAULT_MAX_TOKENS,
            max_retries: retry::DEFAULT_MAX_RETRIES,
        }
    }
}

// =============================================================================
// Segmentation Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Upper bound of one segment, in characters
    pub chunk_size: usize,

    /// Characters shared by adjacent segments
    pub overlap: usize,

    pub max_segments: usize,

    pub strategy: SegmentStrategy,

    /// Append a cross-segment synthesis block when merging outputs
    pub preserve_context: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            chunk_size: segmentation::DEFAULT_CHUNK_SIZE,
            overlap: segmentation::DEFAULT_OVERLAP,
            max_segments: segmentation::DEFAULT_MAX_SEGMENTS,
            strategy: SegmentStrategy::default(),
            preserve_context: true,
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,

    /// Records older than this are removed by `cleanup`
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".tickerlens/executions.db"),
            retention_days: store::DEFAULT_RETENTION_DAYS,
        }
    }
}

// =============================================================================
// Data Source Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root of `<stock_code>/<section>.json` snapshots
    pub snapshot_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("data"),
        }
    }
}

// =============================================================================
// Notification Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub webhooks: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.max_tokens, 4000);
        assert_eq!(config.segmentation.max_segments, 6);
        assert_eq!(config.storage.retention_days, 90);
    }

    #[test]
    fn test_validate_rejects_bad_llm_settings() {
        let mut config = Config::default();
        config.llm.temperature = 1.5;
        assert!(matches!(config.validate(), Err(LensError::Config(_))));

        let mut config = Config::default();
        config.llm.top_p = -0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_segmentation() {
        let mut config = Config::default();
        config.segmentation.overlap = config.segmentation.chunk_size;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overlap"));

        let mut config = Config::default();
        config.segmentation.max_segments = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_never_serialized() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".into());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(!rendered.contains("api_key"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            model = "deepseek-chat"

            [segmentation]
            strategy = "fixed"

            [[notify.webhooks]]
            name = "desk"
            url = "https://hooks.example.com/desk"
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "deepseek-chat");
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.segmentation.strategy, SegmentStrategy::Fixed);
        assert_eq!(config.segmentation.chunk_size, 8000);
        assert_eq!(config.notify.webhooks[0].name, "desk");
    }
}
