//! Run Metrics Collection
//!
//! Aggregates model usage, cost, and latency across one analysis run.
//! Thread-safe for concurrent analyst calls within a stage.
//!
//! ## Usage
//!
//! ```ignore
//! let metrics = create_shared_metrics(session_id.as_str());
//! metrics.record_response(&response);
//! let summary = metrics.summary();
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::ai::provider::GenerationResponse;

// =============================================================================
// Metrics Collector
// =============================================================================

/// Thread-safe metrics collector for one run.
///
/// Counters are atomics; only the per-stage list sits behind a lock.
pub struct MetricsCollector {
    session_id: String,
    start_time: Instant,
    api_calls: AtomicU32,
    failed_calls: AtomicU32,
    segmented_calls: AtomicU32,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    total_latency_ms: AtomicU64,
    /// Stored as microdollars for atomic ops
    total_cost_micros: AtomicU64,
    /// Calls whose model had rate data
    priced_calls: AtomicU32,
    stages: RwLock<Vec<StageMetrics>>,
}

/// Outcome counts for one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub name: String,
    pub agents: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Summary statistics for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub session_id: String,
    pub total_duration_ms: u64,
    pub api_calls: u32,
    pub failed_calls: u32,
    pub segmented_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub avg_latency_ms: f64,
    /// None when no call had rate data
    pub total_cost_usd: Option<f64>,
    pub stages: Vec<StageMetrics>,
}

impl MetricsCollector {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            start_time: Instant::now(),
            api_calls: AtomicU32::new(0),
            failed_calls: AtomicU32::new(0),
            segmented_calls: AtomicU32::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
            priced_calls: AtomicU32::new(0),
            stages: RwLock::new(Vec::new()),
        }
    }

    /// Record a successful model call
    pub fn record_response(&self, response: &GenerationResponse) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(u64::from(response.usage.input_tokens), Ordering::Relaxed);
        self.output_tokens
            .fetch_add(u64::from(response.usage.output_tokens), Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(response.elapsed.as_millis() as u64, Ordering::Relaxed);

        if response.finish_reason == "segmented" {
            self.segmented_calls.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(cost) = response.cost_usd {
            self.priced_calls.fetch_add(1, Ordering::Relaxed);
            self.total_cost_micros
                .fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);
        }
    }

    /// Record a model call that failed after retries
    pub fn record_failure(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage(&self, stage: StageMetrics) {
        let mut stages = self.stages.write().unwrap_or_else(|poisoned| {
            tracing::error!("Metrics stages RwLock poisoned, recovering");
            poisoned.into_inner()
        });
        stages.push(stage);
    }

    /// Current metrics snapshot
    pub fn summary(&self) -> MetricsSummary {
        let api_calls = self.api_calls.load(Ordering::Relaxed);
        let failed_calls = self.failed_calls.load(Ordering::Relaxed);
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        let succeeded = api_calls.saturating_sub(failed_calls);

        let avg_latency = if succeeded > 0 {
            total_latency as f64 / f64::from(succeeded)
        } else {
            0.0
        };

        let total_cost_usd = (self.priced_calls.load(Ordering::Relaxed) > 0)
            .then(|| self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0);

        let stages = self
            .stages
            .read()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Metrics stages RwLock poisoned on read, recovering");
                poisoned.into_inner()
            })
            .clone();

        MetricsSummary {
            session_id: self.session_id.clone(),
            total_duration_ms: self.start_time.elapsed().as_millis() as u64,
            api_calls,
            failed_calls,
            segmented_calls: self.segmented_calls.load(Ordering::Relaxed),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            avg_latency_ms: avg_latency,
            total_cost_usd,
            stages,
        }
    }
}

impl MetricsSummary {
    /// Format summary for display
    pub fn display(&self) -> String {
        let cost = self
            .total_cost_usd
            .map(|c| format!("${:.4}", c))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "Session: {}\n\
             Duration: {:.1}s\n\
             Model Calls: {} ({} failed, {} segmented)\n\
             Tokens: {} (input: {}, output: {})\n\
             Avg Latency: {:.0}ms\n\
             Estimated Cost: {}",
            self.session_id,
            self.total_duration_ms as f64 / 1000.0,
            self.api_calls,
            self.failed_calls,
            self.segmented_calls,
            self.total_tokens,
            self.input_tokens,
            self.output_tokens,
            self.avg_latency_ms,
            cost
        )
    }
}

// =============================================================================
// Shared Type
// =============================================================================

/// Shared metrics collector for pipeline stages
pub type SharedMetrics = Arc<MetricsCollector>;

pub fn create_shared_metrics(session_id: impl Into<String>) -> SharedMetrics {
    Arc::new(MetricsCollector::new(session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::TokenUsage;
    use std::time::Duration;

    fn response(input: u32, output: u32, cost: Option<f64>) -> GenerationResponse {
        let mut response = GenerationResponse::content_only("ok", "gpt-4o");
        response.usage = TokenUsage::new(input, output);
        response.cost_usd = cost;
        response.elapsed = Duration::from_millis(500);
        response
    }

    #[test]
    fn test_record_response() {
        let metrics = MetricsCollector::new("test-session");
        metrics.record_response(&response(100, 50, Some(0.0125)));

        let summary = metrics.summary();
        assert_eq!(summary.api_calls, 1);
        assert_eq!(summary.total_tokens, 150);
        assert_eq!(summary.avg_latency_ms, 500.0);
        assert!((summary.total_cost_usd.unwrap() - 0.0125).abs() < 0.0001);
    }

    #[test]
    fn test_cost_absent_without_rate_data() {
        let metrics = MetricsCollector::new("s");
        metrics.record_response(&response(10, 10, None));
        metrics.record_failure();

        let summary = metrics.summary();
        assert_eq!(summary.total_cost_usd, None);
        assert_eq!(summary.api_calls, 2);
        assert_eq!(summary.failed_calls, 1);
        assert!(summary.display().contains("n/a"));
    }

    #[test]
    fn test_concurrent_recording() {
        use std::thread;

        let metrics = create_shared_metrics("concurrent-test");

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_response(&response(10, 5, Some(0.001)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let summary = metrics.summary();
        assert_eq!(summary.api_calls, 1000);
        assert_eq!(summary.input_tokens, 10000);
        assert_eq!(summary.output_tokens, 5000);
        assert!((summary.total_cost_usd.unwrap() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_stage_metrics_kept_in_order() {
        let metrics = MetricsCollector::new("s");
        for name in ["collect", "analyze"] {
            metrics.record_stage(StageMetrics {
                name: name.into(),
                agents: 3,
                failed: 1,
                duration_ms: 10,
            });
        }
        let names: Vec<_> = metrics.summary().stages.into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["collect", "analyze"]);
    }
}
