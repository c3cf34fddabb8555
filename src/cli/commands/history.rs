//! History Command
//!
//! Browse past runs, or individual analyst executions across partitions.
//!
//! Usage:
//!   tickerlens history [--stock CODE] [-n 20]
//!   tickerlens history --executions [--agent technical] [--session ID] [--since DATE]

use chrono::NaiveDate;
use serde_json::json;

use crate::cli::Output;
use crate::cli::util::{CommandContext, OutputFormat};
use crate::storage::{ExecutionFilter, ExecutionRecord, ExecutionStatus, RunRecord};
use crate::types::{AgentType, Result, truncate_chars};

pub struct HistoryOptions {
    pub stock_code: Option<String>,
    pub session_id: Option<String>,
    /// Empty means every analyst partition
    pub agents: Vec<AgentType>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub errors_only: bool,
    pub include_deleted: bool,
    pub executions: bool,
    pub limit: usize,
    pub format: OutputFormat,
}

impl HistoryOptions {
    fn filter(&self) -> ExecutionFilter {
        ExecutionFilter {
            session_id: self.session_id.clone(),
            stock_code: self.stock_code.clone(),
            status: self.errors_only.then_some(ExecutionStatus::Error),
            since: self.since,
            until: self.until,
            model: None,
            include_deleted: self.include_deleted,
            limit: Some(self.limit),
        }
    }
}

pub fn run(ctx: &CommandContext, options: &HistoryOptions) -> Result<()> {
    if options.executions || options.session_id.is_some() || !options.agents.is_empty() {
        let records = ctx
            .executions()
            .query_across_shards(&options.agents, &options.filter());
        print_executions(&records, options.format)
    } else {
        let runs = ctx
            .runs()
            .recent(options.stock_code.as_deref(), options.limit)?;
        print_runs(&runs, options.format)
    }
}

fn print_runs(runs: &[RunRecord], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(runs)?);
        return Ok(());
    }

    let out = Output::new();
    if runs.is_empty() {
        out.info("No runs recorded yet");
        return Ok(());
    }

    out.header("Recent Runs");
    for run in runs {
        let verdict = match &run.decision {
            Some(decision) => format!(
                "{} {:.1} ({:.0}%)",
                out.recommendation(decision.recommendation),
                decision.overall_score,
                decision.confidence * 100.0
            ),
            None => format!(
                "failed: {}",
                truncate_chars(run.failure_reason.as_deref().unwrap_or("unknown"), 60)
            ),
        };
        println!(
            "  {}  {:<8} {:<12} {}  [{}/{} failed]  {}",
            run.completed_at.format("%Y-%m-%d %H:%M"),
            run.stock_code,
            run.stock_name.as_deref().unwrap_or("-"),
            verdict,
            run.failed_agents,
            run.total_agents,
            run.session_id
        );
    }
    Ok(())
}

fn print_executions(records: &[ExecutionRecord], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let rows: Vec<_> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "session_id": r.session_id,
                    "agent_type": r.agent_type,
                    "agent_name": r.agent_name,
                    "stock_code": r.stock_code,
                    "started_at": r.started_at,
                    "status": r.execution_status.as_str(),
                    "score": r.score,
                    "recommendation": r.recommendation,
                    "confidence": r.confidence,
                    "processing_time_ms": r.processing_time_ms,
                    "total_tokens": r.total_tokens,
                    "model": r.model,
                    "error_message": r.error_message,
                    "deleted_at": r.deleted_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let out = Output::new();
    if records.is_empty() {
        out.info("No executions match");
        return Ok(());
    }

    out.header(&format!("Executions ({})", records.len()));
    for record in records {
        let outcome = match record.execution_status {
            ExecutionStatus::Success => format!(
                "{} {}",
                record
                    .score
                    .map_or("-".to_string(), |s| format!("{:.0}", s)),
                record.recommendation.map_or("", |r| r.label())
            ),
            ExecutionStatus::Error => format!(
                "error: {}",
                truncate_chars(record.error_message.as_deref().unwrap_or("unknown"), 60)
            ),
        };
        println!(
            "  {}  {:<8} {:<24} {:>7}ms  {}{}",
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.stock_code,
            record.agent_type.display_name(),
            record.processing_time_ms.unwrap_or(0),
            outcome,
            if record.deleted_at.is_some() {
                "  (deleted)"
            } else {
                ""
            }
        );
    }
    Ok(())
}
