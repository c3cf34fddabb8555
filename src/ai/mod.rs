//! AI Integration Layer
//!
//! Everything between an analyst's prompt and a model's answer: sizing,
//! segmentation, backend calls with retry, extraction, and usage metrics.

pub mod client;
pub mod extraction;
pub mod metrics;
pub mod provider;
pub mod segmentation;
pub mod timeout;
pub mod tokenizer;

pub use client::ModelClient;
pub use extraction::{JsonRepairer, ParsedAnalysis, ResponseParser, extract_json};
pub use metrics::{
    MetricsCollector, MetricsSummary, SharedMetrics, StageMetrics, create_shared_metrics,
};
pub use provider::{
    ChatMessage, ErrorCategory, ErrorClassifier, GenerationConfig, GenerationResponse, LlmError,
    ModelBackend, ModelInfo, ModelRegistry, RetryPolicy, Role, SharedBackend, TokenUsage,
    create_backend, generate_with_retry,
};
pub use segmentation::{
    ContentSegment, ContentSegmenter, SegmentOptions, SegmentRun, SegmentStrategy,
    process_segments, segment_failure_placeholder,
};
pub use timeout::{TimeoutPolicy, with_timeout};
pub use tokenizer::{TokenEstimator, estimate_tokens};
