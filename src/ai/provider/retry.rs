//! Bounded retry for backend calls.
//!
//! ## Strategy
//!
//! 1. Compute the request timeout from its size (see `ai::timeout`)
//! 2. Run the attempt under that timeout, +15s for every earlier attempt
//! 3. Retry only transient failures: timeouts, network errors, 5xx, 429
//! 4. Back off `min(1000ms * 2^n, 5000ms)` between attempts, no jitter
//! 5. Once retries run out, return the last error as-is

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{debug, instrument, warn};

use super::{ChatMessage, GenerationConfig, GenerationResponse, ModelBackend};
use crate::ai::timeout::{TimeoutPolicy, with_timeout};
use crate::constants::retry as retry_constants;
use crate::types::{LensError, Result};

/// Retry and timeout settings for backend calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
    pub timeout: TimeoutPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: retry_constants::DEFAULT_MAX_RETRIES,
            min_delay: Duration::from_millis(retry_constants::BASE_DELAY_MS),
            max_delay: Duration::from_millis(retry_constants::MAX_DELAY_MS),
            factor: retry_constants::BACKOFF_FACTOR,
            timeout: TimeoutPolicy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_retries)
    }
}

/// Validate, then call the backend with timeout escalation and bounded retry.
#[instrument(skip_all, fields(backend = backend.name(), model = %config.model))]
pub async fn generate_with_retry(
    backend: &dyn ModelBackend,
    messages: &[ChatMessage],
    config: &GenerationConfig,
    policy: &RetryPolicy,
) -> Result<GenerationResponse> {
    config.validate()?;

    let base_timeout = config
        .timeout
        .unwrap_or_else(|| policy.timeout.for_messages(messages, config.max_tokens));

    let attempts = AtomicUsize::new(0);
    let attempts = &attempts;

    let run_attempt = || async move {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        let timeout = policy.timeout.for_attempt(base_timeout, attempt);
        let mut request_config = config.clone();
        request_config.timeout = Some(timeout);

        debug!(attempt, timeout_secs = timeout.as_secs(), "Backend attempt");
        with_timeout(
            timeout,
            backend.generate(messages, &request_config),
            "model backend request",
        )
        .await
    };

    let result = run_attempt
        .retry(policy.backoff())
        .when(|err: &LensError| err.is_retryable())
        .notify(|err: &LensError, delay: Duration| {
            warn!(
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Transient backend failure, retrying"
            );
        })
        .await;

    if let Err(err) = &result {
        warn!(
            attempts = attempts.load(Ordering::SeqCst),
            error = %err,
            "Backend call failed"
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, ErrorClassifier, LlmError};
    use async_trait::async_trait;
    use backon::BackoffBuilder;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    /// Fails `failures` times with `error`, then succeeds
    struct MockBackend {
        calls: AtomicU32,
        failures: u32,
        error: fn() -> LensError,
        seen_timeouts: Mutex<Vec<Duration>>,
    }

    impl MockBackend {
        fn new(failures: u32, error: fn() -> LensError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                error,
                seen_timeouts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for MockBackend {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            config: &GenerationConfig,
        ) -> Result<GenerationResponse> {
            if let Some(t) = config.timeout {
                self.seen_timeouts.lock().unwrap().push(t);
            }
            let count = self.calls.fetch_add(1, Ordering::SeqCst);
            if count < self.failures {
                return Err((self.error)());
            }
            Ok(GenerationResponse::content_only("ok", &config.model))
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        }
    }

    fn server_error() -> LensError {
        ErrorClassifier::classify_http_status(503, "overloaded", "mock").into()
    }

    fn bad_request() -> LensError {
        ErrorClassifier::classify_http_status(400, "bad field", "mock").into()
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default().with_max_retries(5);
        let delays: Vec<Duration> = policy.backoff().build().collect();
        assert_eq!(
            delays,
            [1, 2, 4, 5, 5].map(Duration::from_secs).to_vec(),
        );

        // Deterministic: no jitter between two schedules
        let again: Vec<Duration> = policy.backoff().build().collect();
        assert_eq!(delays, again);
    }

    #[test]
    fn test_backoff_stops_after_max_retries() {
        let delays: Vec<Duration> = RetryPolicy::default().backoff().build().collect();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let backend = MockBackend::new(2, server_error);
        let response = generate_with_retry(
            &backend,
            &[ChatMessage::user("hi")],
            &GenerationConfig::new("m"),
            &fast_policy(2),
        )
        .await
        .unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_escalates_per_attempt() {
        let backend = MockBackend::new(2, || LensError::timeout("x", Duration::from_secs(1)));
        generate_with_retry(
            &backend,
            &[ChatMessage::user("hi")],
            &GenerationConfig::new("m"),
            &fast_policy(2),
        )
        .await
        .unwrap();
        let seen = backend.seen_timeouts.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1] - seen[0], Duration::from_secs(15));
        assert_eq!(seen[2] - seen[0], Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let backend = MockBackend::new(5, bad_request);
        let err = generate_with_retry(
            &backend,
            &[ChatMessage::user("hi")],
            &GenerationConfig::new("m"),
            &fast_policy(3),
        )
        .await
        .unwrap_err();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            err,
            LensError::Llm(LlmError { category: ErrorCategory::ClientError, status: Some(400), .. })
        ));
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let backend = MockBackend::new(10, || {
            ErrorClassifier::classify_http_status(429, "slow down", "mock").into()
        });
        let err = generate_with_retry(
            &backend,
            &[ChatMessage::user("hi")],
            &GenerationConfig::new("m"),
            &fast_policy(2),
        )
        .await
        .unwrap_err();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        match err {
            LensError::Llm(e) => {
                assert_eq!(e.category, ErrorCategory::RateLimit);
                assert_eq!(e.body.as_deref(), Some("slow down"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_call() {
        let backend = MockBackend::new(0, server_error);
        let mut config = GenerationConfig::new("m");
        config.temperature = 1.5;
        let err = generate_with_retry(&backend, &[ChatMessage::user("hi")], &config, &fast_policy(2))
            .await
            .unwrap_err();
        assert!(matches!(err, LensError::Validation(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        struct Slow;

        #[async_trait]
        impl ModelBackend for Slow {
            async fn generate(
                &self,
                _messages: &[ChatMessage],
                config: &GenerationConfig,
            ) -> Result<GenerationResponse> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(GenerationResponse::content_only("late", &config.model))
            }

            fn name(&self) -> &str {
                "slow"
            }
        }

        let mut config = GenerationConfig::new("m");
        config.timeout = Some(Duration::from_millis(10));
        let mut policy = fast_policy(0);
        policy.timeout.retry_escalation_secs = 0;
        let err = generate_with_retry(&Slow, &[ChatMessage::user("hi")], &config, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, LensError::Timeout { .. }));
    }
}
