//! TickerLens - Multi-Analyst LLM Equity Research
//!
//! Runs a panel of specialized LLM analysts over market data for one stock
//! and consolidates their views into a single buy/hold/sell decision.
//!
//! ## Core Features
//!
//! - **Staged Pipeline**: collect → validate → analyze → integrate, where a
//!   failing analyst degrades confidence instead of aborting the run
//! - **Content Segmentation**: oversized prompts are split on sentence
//!   boundaries, processed per segment and reassembled
//! - **Model Backend Adapter**: parameter validation, classified retries and
//!   timeouts that scale with prompt size
//! - **Sharded Execution Store**: one SQLite partition per analyst type with
//!   cross-partition queries, stats and retention cleanup
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tickerlens::{AnalysisPipeline, AnalysisRequest, ConfigLoader, ModelClient};
//! use tickerlens::ai::GenerationConfig;
//! use tickerlens::pipeline::{SnapshotDirSource, default_roster};
//!
//! let config = ConfigLoader::load()?;
//! let client = Arc::new(ModelClient::from_config(&config)?);
//! let roster = default_roster(client, GenerationConfig::from_llm_config(&config.llm))?;
//! let pipeline = AnalysisPipeline::new(roster, Arc::new(SnapshotDirSource::new("data")));
//! let report = pipeline.run(AnalysisRequest::new("600519")).await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: model backends, retry/timeout policy, segmentation, metrics
//! - [`pipeline`]: orchestrator, analysts, data gate, decision synthesis
//! - [`storage`]: SQLite persistence with per-analyst partitions
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use config::{Config, ConfigLoader};

pub use types::{
    AgentResult, AgentType, FinalDecision, LensError, Recommendation, Result, ResultExt,
    SessionId, StageResult,
};

pub use storage::{Database, ExecutionRecord, ExecutionStore, RunStore, SharedDatabase};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{
    AnalysisPipeline, AnalysisReport, AnalysisRequest, PipelineState, run_until_cancelled,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    ContentSegmenter, MetricsCollector, ModelBackend, ModelClient, RetryPolicy, TimeoutPolicy,
    TokenEstimator,
};
