//! Fault isolation for analyst calls and data fetches.
//!
//! `safe_call` and `safe_fetch` never fail. Errors and panics from the
//! wrapped future become a neutral fallback value and a `warn!` line. Every
//! analyst call also leaves one execution record behind, success or not. The
//! record is written before the call runs, so a dropped call keeps its row
//! with status `error` and no completion time.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::storage::{ExecutionRecord, ExecutionStore};
use crate::types::{AgentResult, AgentType, Result};

/// Writes one execution record per analyst call for a single run.
///
/// Without a store the recorder is inert; analysis runs the same either way.
#[derive(Clone)]
pub struct ExecutionRecorder {
    store: Option<Arc<ExecutionStore>>,
    session_id: String,
    stock_code: String,
}

impl ExecutionRecorder {
    pub fn new(
        store: Option<Arc<ExecutionStore>>,
        session_id: impl Into<String>,
        stock_code: impl Into<String>,
    ) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            stock_code: stock_code.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stock_code(&self) -> &str {
        &self.stock_code
    }

    /// Open the record and insert it. Failures are logged only.
    async fn begin(&self, agent_type: AgentType, agent_name: &str) -> ExecutionRecord {
        let record = ExecutionRecord::begin(
            self.session_id.clone(),
            agent_type,
            agent_name,
            self.stock_code.clone(),
        )
        .with_metadata("stage", agent_type.stage().into());

        if let Some(store) = self.store.clone() {
            let opened = record.clone();
            match tokio::task::spawn_blocking(move || store.write(&opened)).await {
                Ok(Ok(id)) => debug!(agent = agent_name, id = %id, "Execution opened"),
                Ok(Err(err)) => {
                    error!(agent = agent_name, error = %err, "Failed to open execution record")
                }
                Err(err) => error!(agent = agent_name, error = %err, "Execution record task aborted"),
            }
        }
        record
    }

    /// Complete the opened row from the result. Failures are logged only.
    async fn finish(&self, record: ExecutionRecord, result: &AgentResult) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let record = record.finish(result);
        let agent = record.agent_name.clone();
        let id = record.id.clone();

        match tokio::task::spawn_blocking(move || store.finalize(&record)).await {
            Ok(Ok(())) => debug!(agent = %agent, id = %id, "Execution recorded"),
            Ok(Err(err)) => error!(agent = %agent, error = %err, "Failed to finalize execution record"),
            Err(err) => error!(agent = %agent, error = %err, "Execution record task aborted"),
        }
    }
}

/// Run one analyst call in isolation.
///
/// A returned result is marked successful and keeps its fields. An error or
/// panic becomes `AgentResult::failed` carrying the cause.
pub async fn safe_call<F>(
    name: &str,
    agent_type: AgentType,
    recorder: &ExecutionRecorder,
    call: F,
) -> AgentResult
where
    F: Future<Output = Result<AgentResult>>,
{
    let record = recorder.begin(agent_type, name).await;
    let start = Instant::now();

    let mut result = match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(mut result)) => {
            result.agent_name = name.to_string();
            result.agent_type = agent_type;
            result.success = true;
            result.error_message = None;
            result.score = result.score.map(|s| s.clamp(0.0, 100.0));
            result.confidence = result.confidence.map(|c| c.clamp(0.0, 1.0));
            result
        }
        Ok(Err(err)) => {
            warn!(agent = name, error = %err, "Analyst failed, using neutral fallback");
            AgentResult::failed(name, agent_type, err.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic);
            warn!(agent = name, panic = %message, "Analyst panicked, using neutral fallback");
            AgentResult::failed(name, agent_type, format!("panicked: {}", message))
        }
    };
    result.processing_time_ms = start.elapsed().as_millis() as u64;

    recorder.finish(record, &result).await;
    result
}

/// Run one data fetch in isolation, yielding `default` on error or panic
pub async fn safe_fetch<T, F>(name: &str, fetch: F, default: T) -> T
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fetch).catch_unwind().await {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            warn!(fetch = name, error = %err, "Data fetch failed, using default");
            default
        }
        Err(panic) => {
            warn!(fetch = name, panic = %panic_message(panic), "Data fetch panicked, using default");
            default
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
