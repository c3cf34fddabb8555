//! Request Timeout Policy
//!
//! Timeouts for model backend calls are computed per request from its size:
//! - base 120s
//! - +2s per message
//! - +1s per 1,000 input characters
//! - +1s per 100 requested output tokens
//!
//! clamped to [120s, 300s], then +15s for every retry already attempted.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::ai::timeout::{TimeoutPolicy, with_timeout};
//!
//! let policy = TimeoutPolicy::default();
//! let timeout = policy.for_attempt(policy.for_messages(&messages, 4000), attempt);
//! let response = with_timeout(timeout, backend.generate(&request), "generate").await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::ai::provider::ChatMessage;
use crate::constants::timeout as limits;
use crate::types::{LensError, Result};

/// Size-scaled timeout policy for backend requests
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    pub base_secs: u64,
    pub per_message_secs: u64,
    pub chars_per_sec: u64,
    pub output_tokens_per_sec: u64,
    pub min_secs: u64,
    pub max_secs: u64,
    pub retry_escalation_secs: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base_secs: limits::BASE_SECS,
            per_message_secs: limits::PER_MESSAGE_SECS,
            chars_per_sec: limits::CHARS_PER_SEC,
            output_tokens_per_sec: limits::OUTPUT_TOKENS_PER_SEC,
            min_secs: limits::MIN_SECS,
            max_secs: limits::MAX_SECS,
            retry_escalation_secs: limits::RETRY_ESCALATION_SECS,
        }
    }
}

impl TimeoutPolicy {
    /// Timeout for a request before any retry
    pub fn base_timeout(&self, message_count: usize, input_chars: usize, max_tokens: u32) -> Duration {
        let secs = self.base_secs
            + self.per_message_secs * message_count as u64
            + input_chars as u64 / self.chars_per_sec.max(1)
            + u64::from(max_tokens) / self.output_tokens_per_sec.max(1);
        Duration::from_secs(secs.clamp(self.min_secs, self.max_secs))
    }

    /// Timeout for the given attempt (0 = first try)
    pub fn for_attempt(&self, base: Duration, attempt: usize) -> Duration {
        base + Duration::from_secs(self.retry_escalation_secs * attempt as u64)
    }

    /// First-attempt timeout for a chat request
    pub fn for_messages(&self, messages: &[ChatMessage], max_tokens: u32) -> Duration {
        let input_chars = messages.iter().map(|m| m.content.chars().count()).sum();
        self.base_timeout(messages.len(), input_chars, max_tokens)
    }
}

/// Execute an async operation with a timeout
///
/// Returns a timeout error if the operation doesn't complete within the specified duration.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(LensError::timeout(operation_name, timeout)),
    }
}
