//! Analysis Pipeline
//!
//! Linear state machine with one hard gate:
//!
//! ```text
//! INIT -> STAGE1_COLLECT -> VALIDATE -> STAGE2_ANALYZE -> STAGE3_INTEGRATE -> FINALIZE
//!                              |
//!                              +-> FAILED
//! ```
//!
//! - Stage 1: every data fetch and every data analyst, concurrently
//! - Validate: essential data present, otherwise the run ends as FAILED
//! - Stage 2: second-opinion analysts over the stage 1 results, concurrently
//! - Stage 3: the decision analyst over everything so far
//! - Finalize: deterministic decision, run record, notification
//!
//! Every analyst call goes through `safe_call`, so no analyst can abort a
//! run. Dropping the `run` future cancels it; nothing is recorded as a
//! finished run in that case, while calls already started keep their open
//! execution records.

pub mod agents;
pub mod data;
pub mod decision;
pub mod notifier;
pub mod safe_call;
pub mod validation;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};

pub use agents::{
    AnalysisContext, Analyst, AnalystProfile, LlmAnalyst, Roster, SharedAnalyst, default_profiles,
    default_roster,
};
pub use data::{DataSection, MarketData, MarketDataSource, SharedDataSource, SnapshotDirSource};
pub use decision::synthesize_decision;
pub use notifier::{
    LogNotifier, MultiNotifier, NotifyResult, Notifier, SharedNotifier, WebhookNotifier,
    notifier_from_config, render_markdown, report_title,
};
pub use safe_call::{ExecutionRecorder, safe_call, safe_fetch};
pub use validation::validate_essential_data;

use crate::ai::{MetricsCollector, MetricsSummary, StageMetrics};
use crate::storage::{ExecutionStore, RunRecord, RunStatus, RunStore};
use crate::types::{
    AgentResult, FinalDecision, LensError, Result, SessionId, StageResult, json_string,
};

pub const STAGE1_NAME: &str = "data_collection";
pub const STAGE2_NAME: &str = "professional_analysis";
pub const STAGE3_NAME: &str = "decision_integration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    Stage1Collect,
    Validate,
    Stage2Analyze,
    Stage3Integrate,
    Finalize,
    Failed,
}

impl PipelineState {
    /// The only legal successor(s) of each state
    pub fn can_advance_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Init, Stage1Collect)
                | (Stage1Collect, Validate)
                | (Validate, Stage2Analyze)
                | (Validate, Failed)
                | (Stage2Analyze, Stage3Integrate)
                | (Stage3Integrate, Finalize)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Finalize | PipelineState::Failed)
    }
}

/// States visited by one run, in order
#[derive(Debug, Clone)]
struct StateTrace {
    session_id: String,
    states: Vec<PipelineState>,
}

impl StateTrace {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            states: vec![PipelineState::Init],
        }
    }

    fn current(&self) -> PipelineState {
        self.states
            .last()
            .copied()
            .unwrap_or(PipelineState::Init)
    }

    fn advance(&mut self, next: PipelineState) {
        let current = self.current();
        if !current.can_advance_to(next) {
            // Programming error; keep going but make it loud
            error!(session = %self.session_id, from = ?current, to = ?next, "Illegal pipeline transition");
        }
        info!(session = %self.session_id, state = ?next, "Pipeline state");
        self.states.push(next);
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub stock_code: String,
    /// Generated when absent
    pub session_id: Option<SessionId>,
}

impl AnalysisRequest {
    pub fn new(stock_code: impl Into<String>) -> Self {
        Self {
            stock_code: stock_code.into(),
            session_id: None,
        }
    }
}

/// Everything a completed run produced
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub session_id: String,
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub stages: Vec<StageResult>,
    pub decision: FinalDecision,
    pub metrics: MetricsSummary,
    pub states: Vec<PipelineState>,
    pub notifications: Vec<NotifyResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl AnalysisReport {
    pub fn total_agents(&self) -> usize {
        self.stages.iter().map(|s| s.results.len()).sum()
    }

    pub fn failed_agents(&self) -> usize {
        self.stages.iter().map(StageResult::failed_count).sum()
    }
}

pub struct AnalysisPipeline {
    roster: Roster,
    source: SharedDataSource,
    executions: Option<Arc<ExecutionStore>>,
    runs: Option<Arc<RunStore>>,
    notifier: Option<SharedNotifier>,
}

impl AnalysisPipeline {
    pub fn new(roster: Roster, source: SharedDataSource) -> Self {
        Self {
            roster,
            source,
            executions: None,
            runs: None,
            notifier: None,
        }
    }

    pub fn with_execution_store(mut self, store: Arc<ExecutionStore>) -> Self {
        self.executions = Some(store);
        self
    }

    pub fn with_run_store(mut self, runs: Arc<RunStore>) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Run one analysis to a decision, or to the single gate failure
    #[instrument(skip(self, request), fields(stock = %request.stock_code))]
    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let session_id = request.session_id.unwrap_or_else(SessionId::generate);
        let stock_code = request.stock_code;

        let mut trace = StateTrace::new(session_id.as_str());
        let metrics = MetricsCollector::new(session_id.as_str());
        let recorder =
            ExecutionRecorder::new(self.executions.clone(), session_id.as_str(), &stock_code);
        let data = MarketData::new(&stock_code, self.source.clone());

        // === Stage 1: fetches and data analysts together ===
        trace.advance(PipelineState::Stage1Collect);
        let stage1 = {
            let ctx = AnalysisContext {
                stock_code: &stock_code,
                data: &data,
                prior: &[],
                metrics: Some(&metrics),
            };
            let stage_clock = Instant::now();
            let ((), results) = tokio::join!(
                data.prefetch(&DataSection::ALL),
                self.run_analysts(&self.roster.stage1, &ctx, &recorder),
            );
            self.finish_stage(STAGE1_NAME, results, stage_clock, &metrics)
        };

        // === Validate: the one non-degrading step ===
        trace.advance(PipelineState::Validate);
        let basic_info = data.get(DataSection::BasicInfo).await;
        let stock_name = json_string(basic_info, "stock_name");
        if let Err(err) = validate_essential_data(
            &stock_code,
            basic_info,
            data.get(DataSection::RealtimeData).await,
            data.get(DataSection::FinancialData).await,
        ) {
            trace.advance(PipelineState::Failed);
            self.save_run(RunRecord {
                session_id: session_id.to_string(),
                stock_code: stock_code.clone(),
                stock_name,
                status: RunStatus::Failed,
                decision: None,
                failure_reason: Some(err.to_string()),
                total_agents: stage1.results.len(),
                failed_agents: stage1.failed_count(),
                started_at,
                completed_at: Utc::now(),
                processing_time_ms: clock.elapsed().as_millis() as u64,
            })
            .await;
            return Err(err);
        }

        // === Stage 2: second opinions over stage 1 ===
        trace.advance(PipelineState::Stage2Analyze);
        let stage2 = {
            let ctx = AnalysisContext {
                stock_code: &stock_code,
                data: &data,
                prior: &stage1.results,
                metrics: Some(&metrics),
            };
            let stage_clock = Instant::now();
            let results = self
                .run_analysts(&self.roster.stage2, &ctx, &recorder)
                .await;
            self.finish_stage(STAGE2_NAME, results, stage_clock, &metrics)
        };

        // === Stage 3: decision analyst over everything ===
        trace.advance(PipelineState::Stage3Integrate);
        let (synthesizer_result, stage3) = {
            let prior: Vec<AgentResult> = stage1
                .results
                .iter()
                .chain(&stage2.results)
                .cloned()
                .collect();
            let ctx = AnalysisContext {
                stock_code: &stock_code,
                data: &data,
                prior: &prior,
                metrics: Some(&metrics),
            };
            let stage_clock = Instant::now();
            let synthesizer = &self.roster.synthesizer;
            let result = safe_call(
                synthesizer.name(),
                synthesizer.agent_type(),
                &recorder,
                synthesizer.analyze(&ctx),
            )
            .await;
            let stage = self.finish_stage(STAGE3_NAME, vec![result.clone()], stage_clock, &metrics);
            (result, stage)
        };

        // === Finalize ===
        trace.advance(PipelineState::Finalize);
        let decision =
            synthesize_decision(&[stage1.clone(), stage2.clone()], &synthesizer_result);
        info!(
            session = %session_id,
            score = decision.overall_score,
            recommendation = %decision.recommendation,
            confidence = decision.confidence,
            degraded = decision.degraded,
            "Decision reached"
        );

        let mut report = AnalysisReport {
            session_id: session_id.to_string(),
            stock_code: stock_code.clone(),
            stock_name,
            stages: vec![stage1, stage2, stage3],
            decision,
            metrics: metrics.summary(),
            states: trace.states.clone(),
            notifications: Vec::new(),
            started_at,
            completed_at: Utc::now(),
            processing_time_ms: clock.elapsed().as_millis() as u64,
        };

        self.save_run(RunRecord {
            session_id: report.session_id.clone(),
            stock_code: report.stock_code.clone(),
            stock_name: report.stock_name.clone(),
            status: RunStatus::Completed,
            decision: Some(report.decision.clone()),
            failure_reason: None,
            total_agents: report.total_agents(),
            failed_agents: report.failed_agents(),
            started_at,
            completed_at: report.completed_at,
            processing_time_ms: report.processing_time_ms,
        })
        .await;

        report.notifications = self.notify(&report).await;
        Ok(report)
    }

    async fn run_analysts(
        &self,
        analysts: &[SharedAnalyst],
        ctx: &AnalysisContext<'_>,
        recorder: &ExecutionRecorder,
    ) -> Vec<AgentResult> {
        join_all(analysts.iter().map(|analyst| {
            safe_call(
                analyst.name(),
                analyst.agent_type(),
                recorder,
                analyst.analyze(ctx),
            )
        }))
        .await
    }

    fn finish_stage(
        &self,
        name: &str,
        results: Vec<AgentResult>,
        clock: Instant,
        metrics: &MetricsCollector,
    ) -> StageResult {
        let stage = StageResult::new(name, results, clock.elapsed().as_millis() as u64);
        let failed = stage.failed_count();
        if failed > 0 {
            warn!(stage = name, failed, total = stage.results.len(), "Stage finished with failures");
        } else {
            info!(stage = name, total = stage.results.len(), "Stage finished");
        }
        metrics.record_stage(StageMetrics {
            name: name.to_string(),
            agents: stage.results.len(),
            failed,
            duration_ms: stage.processing_time_ms,
        });
        stage
    }

    /// Persist the run outcome. Failures are logged only.
    async fn save_run(&self, run: RunRecord) {
        let Some(runs) = self.runs.clone() else {
            return;
        };
        let session_id = run.session_id.clone();
        match tokio::task::spawn_blocking(move || runs.save(&run)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(session = %session_id, error = %err, "Failed to save run"),
            Err(err) => error!(session = %session_id, error = %err, "Run save task aborted"),
        }
    }

    async fn notify(&self, report: &AnalysisReport) -> Vec<NotifyResult> {
        let Some(notifier) = &self.notifier else {
            return Vec::new();
        };
        let metadata = json!({
            "session_id": report.session_id,
            "stock_code": report.stock_code,
            "recommendation": report.decision.recommendation.as_str(),
            "overall_score": report.decision.overall_score,
            "confidence": report.decision.confidence,
            "degraded": report.decision.degraded,
        });
        let results = notifier
            .send_report(&report_title(report), &render_markdown(report), &metadata)
            .await;
        for failure in results.iter().filter(|r| !r.success) {
            warn!(
                provider = %failure.provider,
                error = failure.error.as_deref().unwrap_or("unknown"),
                "Notification not delivered"
            );
        }
        results
    }
}

/// Race a run against a cancellation signal. Cancelling drops the run.
pub async fn run_until_cancelled<F, C>(run: F, cancel: C) -> Result<AnalysisReport>
where
    F: std::future::Future<Output = Result<AnalysisReport>>,
    C: std::future::Future<Output = ()>,
{
    tokio::select! {
        biased;
        () = cancel => {
            warn!("Analysis cancelled; in-flight calls dropped, nothing recorded as complete");
            Err(LensError::Cancelled)
        }
        result = run => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, ExecutionFilter};
    use crate::types::{AgentType, Recommendation};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixtureSource {
        realtime: Value,
    }

    #[async_trait]
    impl MarketDataSource for FixtureSource {
        async fn fetch(&self, stock_code: &str, section: DataSection) -> Result<Value> {
            Ok(match section {
                DataSection::BasicInfo => json!({"stock_code": stock_code, "stock_name": "平安银行"}),
                DataSection::RealtimeData => self.realtime.clone(),
                DataSection::FinancialData => json!({"data": [{"roe": 0.11}]}),
                DataSection::News => return Err(LensError::Storage("news feed down".into())),
                _ => json!({}),
            })
        }

        fn name(&self) -> &str {
            "fixture"
        }
    }

    struct StubAnalyst {
        agent_type: AgentType,
        score: f64,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Analyst for StubAnalyst {
        fn name(&self) -> &str {
            self.agent_type.display_name()
        }

        fn agent_type(&self) -> AgentType {
            self.agent_type
        }

        async fn analyze(&self, ctx: &AnalysisContext<'_>) -> Result<AgentResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LensError::agent(self.name(), "model timed out"));
            }
            if self.agent_type == AgentType::Technical {
                assert!(ctx.data.get(DataSection::RealtimeData).await.is_object());
            }
            let mut result = AgentResult::new(self.name(), self.agent_type)
                .with_score(self.score)
                .with_confidence(0.8)
                .with_recommendation(Recommendation::Buy)
                .with_analysis(format!("{} prior results", ctx.prior.len()));
            result.key_insights = vec![format!("{} view", self.agent_type)];
            Ok(result)
        }
    }

    struct Counters {
        stage1: Arc<AtomicUsize>,
        stage2: Arc<AtomicUsize>,
        stage3: Arc<AtomicUsize>,
    }

    fn roster(failing: &[AgentType]) -> (Roster, Counters) {
        let counters = Counters {
            stage1: Arc::new(AtomicUsize::new(0)),
            stage2: Arc::new(AtomicUsize::new(0)),
            stage3: Arc::new(AtomicUsize::new(0)),
        };
        let make = |agent_type: AgentType, calls: &Arc<AtomicUsize>| -> SharedAnalyst {
            Arc::new(StubAnalyst {
                agent_type,
                score: 70.0,
                fail: failing.contains(&agent_type),
                calls: calls.clone(),
            })
        };
        let roster = Roster {
            stage1: [
                AgentType::Technical,
                AgentType::Fundamental,
                AgentType::Sentiment,
                AgentType::FundFlow,
            ]
            .into_iter()
            .map(|t| make(t, &counters.stage1))
            .collect(),
            stage2: [AgentType::Risk, AgentType::Industry, AgentType::Valuation]
                .into_iter()
                .map(|t| make(t, &counters.stage2))
                .collect(),
            synthesizer: make(AgentType::ChiefDecision, &counters.stage3),
        };
        (roster, counters)
    }

    fn stores() -> (Arc<ExecutionStore>, Arc<RunStore>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (
            Arc::new(ExecutionStore::new(db.clone())),
            Arc::new(RunStore::new(db)),
        )
    }

    fn pipeline(roster: Roster, realtime: Value) -> (AnalysisPipeline, Arc<ExecutionStore>, Arc<RunStore>) {
        let (executions, runs) = stores();
        let pipeline = AnalysisPipeline::new(roster, Arc::new(FixtureSource { realtime }))
            .with_execution_store(executions.clone())
            .with_run_store(runs.clone())
            .with_notifier(Arc::new(LogNotifier));
        (pipeline, executions, runs)
    }

    #[tokio::test]
    async fn test_full_run_reaches_decision() {
        let (roster, counters) = roster(&[]);
        let (pipeline, executions, runs) = pipeline(roster, json!({"price": 12.5}));

        let report = pipeline.run(AnalysisRequest::new("000001")).await.unwrap();

        assert_eq!(
            report.states,
            vec![
                PipelineState::Init,
                PipelineState::Stage1Collect,
                PipelineState::Validate,
                PipelineState::Stage2Analyze,
                PipelineState::Stage3Integrate,
                PipelineState::Finalize,
            ]
        );
        assert_eq!(report.stock_name.as_deref(), Some("平安银行"));
        assert_eq!(counters.stage1.load(Ordering::SeqCst), 4);
        assert_eq!(counters.stage2.load(Ordering::SeqCst), 3);
        assert_eq!(counters.stage3.load(Ordering::SeqCst), 1);
        assert_eq!(report.total_agents(), 8);
        assert_eq!(report.decision.confidence, 0.8);
        assert!(!report.decision.degraded);
        assert_eq!(report.notifications.len(), 1);

        // Stage 2 saw stage 1; the synthesizer saw both
        assert_eq!(report.stages[1].results[0].analysis, "4 prior results");
        assert_eq!(report.stages[2].results[0].analysis, "7 prior results");

        let records = executions.query_across_shards(&[], &ExecutionFilter::default());
        assert_eq!(records.len(), 8);
        assert!(records.iter().all(|r| r.session_id == report.session_id));

        let run = runs.get(&report.session_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.total_agents, 8);
    }

    #[tokio::test]
    async fn test_gate_failure_stops_before_stage2() {
        let (roster, counters) = roster(&[]);
        let (pipeline, executions, runs) = pipeline(roster, json!({}));

        let mut request = AnalysisRequest::new("000001");
        request.session_id = Some(SessionId::new("gate-test"));
        let err = pipeline.run(request).await.unwrap_err();

        assert!(err.is_essential_data_missing());
        assert_eq!(counters.stage1.load(Ordering::SeqCst), 4);
        assert_eq!(counters.stage2.load(Ordering::SeqCst), 0);
        assert_eq!(counters.stage3.load(Ordering::SeqCst), 0);

        let stage2_records = executions.query_across_shards(
            &[AgentType::Risk, AgentType::Industry, AgentType::Valuation],
            &ExecutionFilter::default(),
        );
        assert!(stage2_records.is_empty());

        let run = runs.get("gate-test").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.failure_reason.unwrap().contains("realtime_data"));
    }

    #[tokio::test]
    async fn test_analyst_failures_degrade_not_abort() {
        let (roster, _) = roster(&[AgentType::Sentiment, AgentType::Valuation]);
        let (pipeline, executions, _) = pipeline(roster, json!({"price": 12.5}));

        let report = pipeline.run(AnalysisRequest::new("000001")).await.unwrap();

        assert_eq!(report.failed_agents(), 2);
        assert!(report.stages.iter().flat_map(|s| &s.results).all(AgentResult::is_well_formed));
        // 0.8 * (1 - 2/8)
        assert!((report.decision.confidence - 0.6).abs() < 1e-9);
        assert!(report.decision.failed_agents.contains(&"Sentiment Analyst".to_string()));

        let failed = executions.query_across_shards(
            &[],
            &ExecutionFilter {
                status: Some(crate::storage::ExecutionStatus::Error),
                ..Default::default()
            },
        );
        assert_eq!(failed.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_synthesizer_uses_fallback() {
        let (roster, _) = roster(&[AgentType::ChiefDecision]);
        let (pipeline, _, _) = pipeline(roster, json!({"price": 12.5}));

        let report = pipeline.run(AnalysisRequest::new("000001")).await.unwrap();
        assert!(report.decision.degraded);
        assert_eq!(report.decision.overall_score, 70.0);
        assert_eq!(report.decision.recommendation, Recommendation::Buy);
    }

    #[tokio::test]
    async fn test_cancellation_records_no_run() {
        let (roster, _) = roster(&[]);
        let (pipeline, _, runs) = pipeline(roster, json!({"price": 12.5}));

        let err = run_until_cancelled(
            pipeline.run(AnalysisRequest::new("000001")),
            std::future::ready(()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LensError::Cancelled));
        assert!(runs.recent(None, 10).unwrap().is_empty());
    }

    struct SlowAnalyst(AgentType);

    #[async_trait]
    impl Analyst for SlowAnalyst {
        fn name(&self) -> &str {
            self.0.display_name()
        }

        fn agent_type(&self) -> AgentType {
            self.0
        }

        async fn analyze(&self, _ctx: &AnalysisContext<'_>) -> Result<AgentResult> {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            Ok(AgentResult::new(self.name(), self.0))
        }
    }

    #[tokio::test]
    async fn test_cancellation_keeps_started_calls() {
        let (mut roster, counters) = roster(&[]);
        roster.stage1 = vec![
            Arc::new(SlowAnalyst(AgentType::Technical)),
            Arc::new(SlowAnalyst(AgentType::Fundamental)),
        ];
        let (pipeline, executions, runs) = pipeline(roster, json!({"price": 12.5}));

        let mut request = AnalysisRequest::new("000001");
        request.session_id = Some(SessionId::new("cancelled-run"));
        let err = run_until_cancelled(
            pipeline.run(request),
            tokio::time::sleep(std::time::Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LensError::Cancelled));

        let records = executions.query_across_shards(
            &[],
            &ExecutionFilter {
                session_id: Some("cancelled-run".into()),
                ..Default::default()
            },
        );
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| {
            r.execution_status == crate::storage::ExecutionStatus::Error
                && r.completed_at.is_none()
        }));
        assert_eq!(counters.stage2.load(Ordering::SeqCst), 0);
        assert!(runs.recent(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_transitions() {
        use PipelineState::*;
        assert!(Validate.can_advance_to(Failed));
        assert!(!Stage2Analyze.can_advance_to(Failed));
        assert!(!Init.can_advance_to(Validate));
        assert!(Finalize.is_terminal());
        assert!(!Validate.is_terminal());
    }
}
