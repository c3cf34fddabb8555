//! Finished analysis runs.
//!
//! One row per run that reached a terminal state. Cancelled runs never get
//! here, so a row always describes a complete outcome.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::database::SharedDatabase;
use crate::types::{FinalDecision, ParseWithDefault, Recommendation, Result, ResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    /// Rejected by the data gate
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl ParseWithDefault for RunStatus {
    fn type_name() -> &'static str {
        "RunStatus"
    }

    fn default_value() -> Self {
        RunStatus::Failed
    }

    fn try_parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub session_id: String,
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub status: RunStatus,
    pub decision: Option<FinalDecision>,
    pub failure_reason: Option<String>,
    pub total_agents: usize,
    pub failed_agents: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl RunRecord {
    pub fn recommendation(&self) -> Option<Recommendation> {
        self.decision.as_ref().map(|d| d.recommendation)
    }
}

pub struct RunStore {
    db: SharedDatabase,
}

impl RunStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn save(&self, run: &RunRecord) -> Result<()> {
        let decision_json = run.decision.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO analysis_runs (
                session_id, stock_code, stock_name, status, overall_score, recommendation,
                confidence, degraded, decision_json, failure_reason, total_agents,
                failed_agents, started_at, completed_at, processing_time_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                run.session_id,
                run.stock_code,
                run.stock_name,
                run.status.as_str(),
                run.decision.as_ref().map(|d| d.overall_score),
                run.recommendation().map(|r| r.as_str()),
                run.decision.as_ref().map(|d| d.confidence),
                run.decision.as_ref().is_some_and(|d| d.degraded),
                decision_json,
                run.failure_reason,
                run.total_agents as i64,
                run.failed_agents as i64,
                format_time(run.started_at),
                format_time(run.completed_at),
                run.processing_time_ms as i64,
            ],
        )
        .with_context_fn(|| format!("Failed to save run {}", run.session_id))?;
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.db.connection()?;
        conn.query_row(
            &format!("SELECT {} FROM analysis_runs WHERE session_id = ?1", COLUMNS),
            [session_id],
            map_run,
        )
        .optional()
        .with_context_fn(|| format!("Failed to load run {}", session_id))
    }

    /// Most recent runs, optionally for one stock
    pub fn recent(&self, stock_code: Option<&str>, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM analysis_runs
                 WHERE (?1 IS NULL OR stock_code = ?1)
                 ORDER BY started_at DESC LIMIT ?2",
                COLUMNS
            ))
            .with_context("Failed to prepare run history query")?;
        let rows = stmt
            .query_map(params![stock_code, limit as i64], map_run)
            .with_context("Failed to query run history")?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to read run history")
    }
}

const COLUMNS: &str = "session_id, stock_code, stock_name, status, decision_json, failure_reason, \
     total_agents, failed_agents, started_at, completed_at, processing_time_ms";

fn map_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let decision: Option<String> = row.get(4)?;
    Ok(RunRecord {
        session_id: row.get(0)?,
        stock_code: row.get(1)?,
        stock_name: row.get(2)?,
        status: RunStatus::parse_or_default(&row.get::<_, String>(3)?),
        decision: decision.and_then(|json| {
            crate::types::log_filter_warn(
                serde_json::from_str::<FinalDecision>(&json),
                "Unreadable stored decision",
            )
        }),
        failure_reason: row.get(5)?,
        total_agents: row.get::<_, i64>(6)?.max(0) as usize,
        failed_agents: row.get::<_, i64>(7)?.max(0) as usize,
        started_at: parse_time(8, &row.get::<_, String>(8)?)?,
        completed_at: parse_time(9, &row.get::<_, String>(9)?)?,
        processing_time_ms: row.get::<_, i64>(10)?.max(0) as u64,
    })
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
