//! Model Client
//!
//! The single entry point analysts use to reach a model:
//!
//! 1. Validate generation settings (no network call on bad input)
//! 2. Size the prompt against the model's input budget
//! 3. Oversized final user message: segment, call once per part, integrate
//! 4. Every call goes through bounded retry with escalating timeouts
//! 5. Attach cost from the rate table and record run metrics

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::ai::metrics::MetricsCollector;
use crate::ai::provider::{
    ChatMessage, GenerationConfig, GenerationResponse, ModelRegistry, RetryPolicy, Role,
    SharedBackend, TokenUsage, create_backend, generate_with_retry,
};
use crate::ai::segmentation::{ContentSegmenter, SegmentOptions, process_segments};
use crate::ai::tokenizer::TokenEstimator;
use crate::config::{Config, SegmentationConfig};
use crate::types::{ErrorCategory, LlmError, Result};

pub struct ModelClient {
    backend: SharedBackend,
    registry: Arc<ModelRegistry>,
    segmenter: ContentSegmenter,
    segmentation: SegmentationConfig,
    retry: RetryPolicy,
    estimator: TokenEstimator,
}

impl ModelClient {
    pub fn new(
        backend: SharedBackend,
        registry: Arc<ModelRegistry>,
        segmentation: SegmentationConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            registry,
            segmenter: ContentSegmenter::from_config(&segmentation),
            segmentation,
            retry,
            estimator: TokenEstimator::new(),
        }
    }

    /// Backend, registry, and retry policy as configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = create_backend(&config.llm)?;
        let registry = Arc::new(ModelRegistry::with_overrides(config.models.clone()));
        Ok(Self::new(
            backend,
            registry,
            config.segmentation.clone(),
            RetryPolicy::default().with_max_retries(config.llm.max_retries),
        ))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    #[instrument(skip_all, fields(model = %config.model))]
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
        metrics: Option<&MetricsCollector>,
    ) -> Result<GenerationResponse> {
        config.validate()?;

        let result = match self.oversized_user_message(messages, config) {
            Some((index, options)) => {
                self.generate_segmented(messages, index, options, config)
                    .await
            }
            None => self.call_once(messages, config).await,
        };

        if let Some(metrics) = metrics {
            match &result {
                Ok(response) => metrics.record_response(response),
                Err(_) => metrics.record_failure(),
            }
        }
        result
    }

    /// Index of the last user message and its budget, when it must be split
    fn oversized_user_message(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Option<(usize, SegmentOptions)> {
        let index = messages.iter().rposition(|m| m.role == Role::User)?;
        let max_input = self
            .registry
            .max_input_tokens(&config.model, config.max_tokens) as usize;
        let others = self
            .estimator
            .estimate_messages(messages)
            .saturating_sub(self.estimator.estimate(&messages[index].content));
        let budget = max_input.saturating_sub(others).max(1);

        self.segmenter
            .needs_segmentation(&messages[index].content, budget)
            .then_some((
                index,
                SegmentOptions {
                    max_input_tokens: budget,
                    strategy: self.segmentation.strategy,
                    max_segments: self.segmentation.max_segments,
                    preserve_context: self.segmentation.preserve_context,
                },
            ))
    }

    async fn call_once(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<GenerationResponse> {
        let mut response =
            generate_with_retry(self.backend.as_ref(), messages, config, &self.retry).await?;
        if response.cost_usd.is_none() {
            response.cost_usd = self.registry.estimate_cost(&config.model, &response.usage);
        }
        Ok(response)
    }

    async fn generate_segmented(
        &self,
        messages: &[ChatMessage],
        index: usize,
        options: SegmentOptions,
        config: &GenerationConfig,
    ) -> Result<GenerationResponse> {
        let start = Instant::now();
        let segments = self.segmenter.segment(&messages[index].content, &options);
        info!(
            segments = segments.len(),
            budget = options.max_input_tokens,
            "Input exceeds budget, generating per segment"
        );

        let run = process_segments(&segments, |segment| {
            let mut part = messages.to_vec();
            part[index] = ChatMessage::user(format!(
                "[Part {}/{}]\n{}",
                segment.index + 1,
                segment.total_segments,
                segment.content
            ));
            async move {
                let response = self.call_once(&part, config).await?;
                debug!(chars = response.content.len(), "Segment answered");
                Ok((response.content.clone(), response))
            }
        })
        .await;

        if run.all_failed() {
            return Err(run.last_error.unwrap_or_else(|| {
                LlmError::new(ErrorCategory::Unknown, "every segment failed").into()
            }));
        }

        let content =
            self.segmenter
                .integrate(&segments, &run.outputs, options.preserve_context);

        let mut usage = TokenUsage::default();
        for response in &run.successes {
            usage.add(&response.usage);
        }

        Ok(GenerationResponse {
            content,
            usage,
            cost_usd: run.successes.iter().map(|r| r.cost_usd).sum(),
            tool_calls: run
                .successes
                .iter()
                .flat_map(|r| r.tool_calls.iter().cloned())
                .collect(),
            finish_reason: "segmented".to_string(),
            model: run
                .successes
                .first()
                .map(|r| r.model.clone())
                .unwrap_or_else(|| config.model.clone()),
            request_id: uuid::Uuid::new_v4().to_string(),
            elapsed: start.elapsed(),
        })
    }
}
