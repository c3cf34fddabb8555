//! Report delivery.
//!
//! Notifiers are fire-and-forget from the pipeline's point of view: each
//! returns one result per provider and never fails the run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::AnalysisReport;
use crate::config::{NotifyConfig, WebhookConfig};
use crate::constants::report::ANALYSIS_PREVIEW_CHARS;
use crate::types::{LensError, Result, truncate_chars};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// Delivery outcome for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyResult {
    pub provider: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl NotifyResult {
    pub fn delivered(provider: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            provider: provider.into(),
            success: true,
            error: None,
            message_id,
        }
    }

    pub fn failed(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            success: false,
            error: Some(error.into()),
            message_id: None,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_report(&self, title: &str, markdown: &str, metadata: &Value) -> Vec<NotifyResult>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes the report title to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_report(&self, title: &str, markdown: &str, _metadata: &Value) -> Vec<NotifyResult> {
        info!(title, chars = markdown.chars().count(), "Report ready");
        vec![NotifyResult::delivered("log", None)]
    }
}

/// POSTs `{title, markdown, metadata}` as JSON
pub struct WebhookNotifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| LensError::Notifier(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client,
        })
    }

    async fn post(&self, payload: &Value) -> Result<Option<String>> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| LensError::Notifier(format!("{}: {}", self.name, e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(LensError::Notifier(format!(
                "{}: HTTP {}: {}",
                self.name,
                status.as_u16(),
                truncate_chars(&body, 200)
            )));
        }

        let message_id = serde_json::from_str::<Value>(&body).ok().and_then(|v| {
            ["message_id", "id"]
                .iter()
                .find_map(|key| v.get(key).map(|id| id.as_str().map_or_else(|| id.to_string(), str::to_string)))
        });
        Ok(message_id)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_report(&self, title: &str, markdown: &str, metadata: &Value) -> Vec<NotifyResult> {
        let payload = json!({
            "title": title,
            "markdown": markdown,
            "metadata": metadata,
        });
        match self.post(&payload).await {
            Ok(message_id) => vec![NotifyResult::delivered(&self.name, message_id)],
            Err(err) => {
                warn!(provider = %self.name, error = %err, "Webhook delivery failed");
                vec![NotifyResult::failed(&self.name, err.to_string())]
            }
        }
    }
}

/// Sends to every inner notifier concurrently
pub struct MultiNotifier {
    notifiers: Vec<SharedNotifier>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<SharedNotifier>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn send_report(&self, title: &str, markdown: &str, metadata: &Value) -> Vec<NotifyResult> {
        join_all(
            self.notifiers
                .iter()
                .map(|n| n.send_report(title, markdown, metadata)),
        )
        .await
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Log notifier always; webhooks when enabled
pub fn notifier_from_config(config: &NotifyConfig) -> Result<SharedNotifier> {
    let mut notifiers: Vec<SharedNotifier> = vec![Arc::new(LogNotifier)];
    if config.enabled {
        for webhook in &config.webhooks {
            notifiers.push(Arc::new(WebhookNotifier::new(webhook)?));
        }
    }
    Ok(Arc::new(MultiNotifier::new(notifiers)))
}

// =============================================================================
// Markdown Report
// =============================================================================

pub fn report_title(report: &AnalysisReport) -> String {
    let name = report.stock_name.as_deref().unwrap_or(&report.stock_code);
    format!(
        "{} ({}): {}",
        name,
        report.stock_code,
        report.decision.recommendation.label()
    )
}

pub fn render_markdown(report: &AnalysisReport) -> String {
    let decision = &report.decision;
    let mut md = String::new();

    md.push_str(&format!("# {}\n\n", report_title(report)));
    md.push_str(&format!(
        "- Score: {:.1} / 100\n- Recommendation: {}\n- Confidence: {:.0}%\n- Session: `{}`\n",
        decision.overall_score,
        decision.recommendation.label(),
        decision.confidence * 100.0,
        report.session_id
    ));
    if decision.degraded {
        md.push_str(
            "\n> Decision synthesizer failed. This verdict averages the remaining analysts.\n",
        );
    }

    push_list(&mut md, "Key Decision Factors", &decision.key_decision_factors);
    push_list(&mut md, "Risk Assessment", &decision.risk_assessment);
    md.push_str(&format!("\n## Action Plan\n\n{}\n", decision.action_plan));

    md.push_str("\n## Analysts\n\n| Stage | Analyst | Score | Recommendation | Confidence | Notes |\n");
    md.push_str("|---|---|---|---|---|---|\n");
    for stage in &report.stages {
        for result in &stage.results {
            let notes = if result.success {
                truncate_chars(&result.analysis.replace(['\n', '|'], " "), ANALYSIS_PREVIEW_CHARS)
            } else {
                format!(
                    "FAILED: {}",
                    result.error_message.as_deref().unwrap_or("unknown error")
                )
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                stage.stage_name,
                result.agent_name,
                result.score.map_or("-".to_string(), |s| format!("{:.0}", s)),
                result.recommendation.map_or("-", |r| r.label()),
                result
                    .confidence
                    .map_or("-".to_string(), |c| format!("{:.2}", c)),
                notes
            ));
        }
    }

    let metrics = &report.metrics;
    md.push_str(&format!(
        "\n_{} model calls, {} tokens, {} in {:.1}s_\n",
        metrics.api_calls,
        metrics.total_tokens,
        metrics
            .total_cost_usd
            .map_or("cost n/a".to_string(), |c| format!("${:.4}", c)),
        report.processing_time_ms as f64 / 1000.0
    ));
    md
}

fn push_list(md: &mut String, heading: &str, items: &[String]) {
    md.push_str(&format!("\n## {}\n\n", heading));
    if items.is_empty() {
        md.push_str("- (none)\n");
    }
    for item in items {
        md.push_str(&format!("- {}\n", item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Notifier for Counting {
        async fn send_report(&self, _: &str, _: &str, _: &Value) -> Vec<NotifyResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            vec![NotifyResult::delivered("counting", Some("m-1".into()))]
        }
    }

    #[tokio::test]
    async fn test_multi_notifier_returns_one_result_per_provider() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let multi = MultiNotifier::new(vec![Arc::new(LogNotifier), counting.clone()]);

        let results = multi.send_report("t", "body", &json!({})).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_webhook_failure_is_a_result_not_an_error() {
        let webhook = WebhookNotifier::new(&WebhookConfig {
            name: "broken".into(),
            url: "not a url".into(),
        })
        .unwrap();

        let results = webhook.send_report("t", "body", &json!({})).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].provider, "broken");
        assert!(results[0].error.is_some());
    }

    #[test]
    fn test_disabled_config_only_logs() {
        let config = NotifyConfig {
            enabled: false,
            webhooks: vec![WebhookConfig {
                name: "hook".into(),
                url: "https://example.invalid/hook".into(),
            }],
        };
        assert!(notifier_from_config(&config).is_ok());
    }
}
