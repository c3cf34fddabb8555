//! Sharded Execution Store
//!
//! One `ExecutionRecord` per analyst invocation, routed to the partition of
//! its agent type. The row is inserted when the call starts and completed in
//! place when it returns, so a cancelled run still leaves its started calls.
//!
//! ## Operations
//!
//! - `write`: lazily create the partition, insert one row
//! - `finalize`: complete a previously written row by id
//! - `query_across_shards`: same filter on every requested partition, merged
//!   newest first; a failing partition contributes nothing
//! - `stats`: reduction over the merged rows
//! - `cleanup`: per-partition soft or hard delete past the retention window

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use super::database::{SharedDatabase, table_exists};
use super::shard::{Partition, ShardManager};
use crate::types::{
    AgentResult, AgentType, ParseWithDefault, Recommendation, Result, ResultExt, ValidationError,
};

// =============================================================================
// Record
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
        }
    }
}

impl ParseWithDefault for ExecutionStatus {
    fn type_name() -> &'static str {
        "ExecutionStatus"
    }

    fn default_value() -> Self {
        ExecutionStatus::Error
    }

    fn try_parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ExecutionStatus::Success),
            "error" => Some(ExecutionStatus::Error),
            _ => None,
        }
    }
}

/// Durable audit row for one analyst invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub session_id: String,
    pub agent_type: AgentType,
    pub agent_name: String,
    pub stock_code: String,
    pub execution_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<u64>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub model: Option<String>,
    pub cost_usd: Option<f64>,
    pub execution_status: ExecutionStatus,
    pub error_message: Option<String>,
    pub score: Option<f64>,
    pub recommendation: Option<Recommendation>,
    pub confidence: Option<f64>,
    pub analysis: Option<String>,
    pub key_insights: Vec<String>,
    pub risks: Vec<String>,
    pub supporting_data: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Record opened at call start. Stays `error` until `finish` says otherwise.
    pub fn begin(
        session_id: impl Into<String>,
        agent_type: AgentType,
        agent_name: impl Into<String>,
        stock_code: impl Into<String>,
    ) -> Self {
        let started_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            agent_type,
            agent_name: agent_name.into(),
            stock_code: stock_code.into(),
            execution_date: started_at.date_naive(),
            started_at,
            completed_at: None,
            processing_time_ms: None,
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            model: None,
            cost_usd: None,
            execution_status: ExecutionStatus::Error,
            error_message: None,
            score: None,
            recommendation: None,
            confidence: None,
            analysis: None,
            key_insights: Vec::new(),
            risks: Vec::new(),
            supporting_data: Map::new(),
            metadata: Map::new(),
            deleted_at: None,
        }
    }

    /// Finalize from the analyst's (possibly fallback) result
    pub fn finish(mut self, result: &AgentResult) -> Self {
        self.completed_at = Some(Utc::now());
        self.processing_time_ms = Some(result.processing_time_ms);
        if let Some(usage) = result.usage {
            self.input_tokens = Some(usage.input_tokens);
            self.output_tokens = Some(usage.output_tokens);
            self.total_tokens = Some(usage.total());
        }
        self.model = result.model.clone();
        self.cost_usd = result.cost_usd;
        self.execution_status = if result.success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        };
        self.error_message = result.error_message.clone();
        self.score = result.score;
        self.recommendation = result.recommendation;
        self.confidence = result.confidence;
        self.analysis = Some(result.analysis.clone());
        self.key_insights = result.key_insights.clone();
        self.risks = result.risks.clone();
        self.supporting_data = result.supporting_data.clone();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// =============================================================================
// Filters, Stats, Cleanup Report
// =============================================================================

/// Predicate applied identically to every partition
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub session_id: Option<String>,
    pub stock_code: Option<String>,
    pub status: Option<ExecutionStatus>,
    /// Inclusive
    pub since: Option<NaiveDate>,
    /// Inclusive
    pub until: Option<NaiveDate>,
    pub model: Option<String>,
    pub include_deleted: bool,
    /// Applied per partition and again after merging
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if !self.include_deleted {
            conditions.push("deleted_at IS NULL");
        }
        if let Some(session_id) = &self.session_id {
            conditions.push("session_id = ?");
            values.push(SqlValue::Text(session_id.clone()));
        }
        if let Some(stock_code) = &self.stock_code {
            conditions.push("stock_code = ?");
            values.push(SqlValue::Text(stock_code.clone()));
        }
        if let Some(status) = self.status {
            conditions.push("execution_status = ?");
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(since) = self.since {
            conditions.push("execution_date >= ?");
            values.push(SqlValue::Text(format_date(since)));
        }
        if let Some(until) = self.until {
            conditions.push("execution_date <= ?");
            values.push(SqlValue::Text(format_date(until)));
        }
        if let Some(model) = &self.model {
            conditions.push("model = ?");
            values.push(SqlValue::Text(model.clone()));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (clause, values)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Aggregates over a merged cross-partition result set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: usize,
    pub success_count: usize,
    /// 0.0 when there are no executions
    pub success_rate: f64,
    /// Over records with a processing time only
    pub avg_processing_time_ms: Option<f64>,
    /// Over records with a score only
    pub avg_score: Option<f64>,
    pub token_usage: TokenTotals,
    pub total_cost_usd: Option<f64>,
    pub by_agent_type: BTreeMap<String, usize>,
    pub by_model: BTreeMap<String, usize>,
    pub recommendation_histogram: BTreeMap<String, usize>,
}

impl ExecutionStats {
    pub fn from_records(records: &[ExecutionRecord]) -> Self {
        fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
            let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            (count > 0).then(|| sum / count as f64)
        }

        let total = records.len();
        let success_count = records
            .iter()
            .filter(|r| r.execution_status == ExecutionStatus::Success)
            .count();

        let mut stats = Self {
            total_executions: total,
            success_count,
            success_rate: if total > 0 {
                success_count as f64 / total as f64
            } else {
                0.0
            },
            avg_processing_time_ms: mean(
                records
                    .iter()
                    .filter_map(|r| r.processing_time_ms)
                    .map(|ms| ms as f64),
            ),
            avg_score: mean(records.iter().filter_map(|r| r.score)),
            total_cost_usd: records
                .iter()
                .filter_map(|r| r.cost_usd)
                .fold(None, |acc, c| Some(acc.unwrap_or(0.0) + c)),
            ..Self::default()
        };

        for record in records {
            stats.token_usage.input_tokens += u64::from(record.input_tokens.unwrap_or(0));
            stats.token_usage.output_tokens += u64::from(record.output_tokens.unwrap_or(0));
            stats.token_usage.total_tokens += u64::from(record.total_tokens.unwrap_or(0));

            *stats
                .by_agent_type
                .entry(record.agent_type.as_str().to_string())
                .or_default() += 1;
            if let Some(model) = &record.model {
                *stats.by_model.entry(model.clone()).or_default() += 1;
            }
            if let Some(recommendation) = record.recommendation {
                *stats
                    .recommendation_histogram
                    .entry(recommendation.as_str().to_string())
                    .or_default() += 1;
            }
        }

        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    /// Set `deleted_at`; rows stay queryable with `include_deleted`
    Soft,
    /// Remove rows
    Hard,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionCleanup {
    pub agent_type: AgentType,
    pub table_name: String,
    pub affected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionFailure {
    pub agent_type: AgentType,
    pub table_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    /// Records dated before this day were targeted
    pub cutoff: NaiveDate,
    pub mode: CleanupMode,
    pub partitions: Vec<PartitionCleanup>,
    pub failed: Vec<PartitionFailure>,
}

impl CleanupReport {
    pub fn total_affected(&self) -> usize {
        self.partitions.iter().map(|p| p.affected).sum()
    }
}

// =============================================================================
// Store
// =============================================================================

const COLUMNS: &str = "id, session_id, agent_type, agent_name, stock_code, execution_date, \
     started_at, completed_at, processing_time_ms, input_tokens, output_tokens, total_tokens, \
     model, cost_usd, execution_status, error_message, score, recommendation, confidence, \
     analysis, key_insights, risks, supporting_data, metadata, deleted_at";

pub struct ExecutionStore {
    db: SharedDatabase,
    shards: ShardManager,
}

impl ExecutionStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            db,
            shards: ShardManager::new(),
        }
    }

    pub fn shards(&self) -> &ShardManager {
        &self.shards
    }

    /// Append one record to its partition. Returns the record id.
    pub fn write(&self, record: &ExecutionRecord) -> Result<String> {
        let conn = self.db.connection()?;
        let partition = self.shards.ensure(&conn, record.agent_type)?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
             ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            partition.table_name, COLUMNS
        );
        conn.execute(
            &sql,
            params![
                record.id,
                record.session_id,
                record.agent_type.as_str(),
                record.agent_name,
                record.stock_code,
                format_date(record.execution_date),
                format_time(record.started_at),
                record.completed_at.map(format_time),
                record.processing_time_ms.map(|ms| ms as i64),
                record.input_tokens,
                record.output_tokens,
                record.total_tokens,
                record.model,
                record.cost_usd,
                record.execution_status.as_str(),
                record.error_message,
                record.score,
                record.recommendation.map(|r| r.as_str()),
                record.confidence,
                record.analysis,
                serde_json::to_string(&record.key_insights)?,
                serde_json::to_string(&record.risks)?,
                serde_json::to_string(&record.supporting_data)?,
                serde_json::to_string(&record.metadata)?,
                record.deleted_at.map(format_time),
            ],
        )
        .with_context_fn(|| format!("Failed to write record to {}", partition.table_name))?;

        debug!(
            table = %partition.table_name,
            id = %record.id,
            status = record.execution_status.as_str(),
            "Execution record written"
        );
        Ok(record.id.clone())
    }

    /// Complete a row opened by `write`. Inserts instead when the opening
    /// write never landed.
    pub fn finalize(&self, record: &ExecutionRecord) -> Result<()> {
        let conn = self.db.connection()?;
        let partition = self.shards.ensure(&conn, record.agent_type)?;

        let sql = format!(
            "UPDATE {} SET completed_at = ?2, processing_time_ms = ?3, input_tokens = ?4, \
             output_tokens = ?5, total_tokens = ?6, model = ?7, cost_usd = ?8, \
             execution_status = ?9, error_message = ?10, score = ?11, recommendation = ?12, \
             confidence = ?13, analysis = ?14, key_insights = ?15, risks = ?16, \
             supporting_data = ?17, metadata = ?18 WHERE id = ?1",
            partition.table_name
        );
        let updated = conn
            .execute(
                &sql,
                params![
                    record.id,
                    record.completed_at.map(format_time),
                    record.processing_time_ms.map(|ms| ms as i64),
                    record.input_tokens,
                    record.output_tokens,
                    record.total_tokens,
                    record.model,
                    record.cost_usd,
                    record.execution_status.as_str(),
                    record.error_message,
                    record.score,
                    record.recommendation.map(|r| r.as_str()),
                    record.confidence,
                    record.analysis,
                    serde_json::to_string(&record.key_insights)?,
                    serde_json::to_string(&record.risks)?,
                    serde_json::to_string(&record.supporting_data)?,
                    serde_json::to_string(&record.metadata)?,
                ],
            )
            .with_context_fn(|| format!("Failed to finalize record in {}", partition.table_name))?;

        if updated == 0 {
            // Release the connection first: the in-memory pool holds only one
            drop(conn);
            warn!(table = %partition.table_name, id = %record.id, "Opening row missing, inserting");
            self.write(record)?;
        } else {
            debug!(
                table = %partition.table_name,
                id = %record.id,
                status = record.execution_status.as_str(),
                "Execution record finalized"
            );
        }
        Ok(())
    }

    /// Query the given partitions (all when empty), newest first.
    #[instrument(skip(self, filter), fields(partitions = agent_types.len()))]
    pub fn query_across_shards(
        &self,
        agent_types: &[AgentType],
        filter: &ExecutionFilter,
    ) -> Vec<ExecutionRecord> {
        let all = AgentType::ALL;
        let targets: &[AgentType] = if agent_types.is_empty() {
            &all
        } else {
            agent_types
        };

        let mut merged = Vec::new();
        for &agent_type in targets {
            match self.query_partition(agent_type, filter) {
                Ok(rows) => merged.extend(rows),
                Err(err) => warn!(
                    agent_type = agent_type.as_str(),
                    error = %err,
                    "Partition query failed, skipping"
                ),
            }
        }

        merged.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            merged.truncate(limit);
        }
        merged
    }

    fn query_partition(
        &self,
        agent_type: AgentType,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>> {
        let conn = self.db.connection()?;
        let partition = self.shards.ensure(&conn, agent_type)?;
        select_records(&conn, &partition, filter)
    }

    /// Aggregates over `query_across_shards`
    pub fn stats(&self, agent_types: &[AgentType], filter: &ExecutionFilter) -> ExecutionStats {
        ExecutionStats::from_records(&self.query_across_shards(agent_types, filter))
    }

    /// Soft- or hard-delete records dated before `today - retention_days`.
    ///
    /// Partitions are processed independently; one failing partition is
    /// reported and does not stop the rest.
    #[instrument(skip(self))]
    pub fn cleanup(&self, retention_days: u32, mode: CleanupMode) -> Result<CleanupReport> {
        if retention_days == 0 {
            return Err(ValidationError::range(
                "retention_days",
                "must be greater than 0",
            )
            .into());
        }

        let cutoff = Utc::now().date_naive() - Duration::days(i64::from(retention_days));
        let mut report = CleanupReport {
            cutoff,
            mode,
            partitions: Vec::new(),
            failed: Vec::new(),
        };

        for agent_type in AgentType::ALL {
            let partition = self.shards.partition(agent_type);
            match self.cleanup_partition(&partition, cutoff, mode) {
                Ok(affected) => report.partitions.push(PartitionCleanup {
                    agent_type,
                    table_name: partition.table_name,
                    affected,
                }),
                Err(err) => {
                    warn!(
                        table = %partition.table_name,
                        error = %err,
                        "Partition cleanup failed, continuing"
                    );
                    report.failed.push(PartitionFailure {
                        agent_type,
                        table_name: partition.table_name,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            cutoff = %cutoff,
            affected = report.total_affected(),
            failed = report.failed.len(),
            "Retention cleanup finished"
        );
        Ok(report)
    }

    fn cleanup_partition(
        &self,
        partition: &Partition,
        cutoff: NaiveDate,
        mode: CleanupMode,
    ) -> Result<usize> {
        let conn = self.db.connection()?;
        if !table_exists(&conn, &partition.table_name)? {
            return Ok(0);
        }

        let cutoff = format_date(cutoff);
        let affected = match mode {
            CleanupMode::Soft => conn.execute(
                &format!(
                    "UPDATE {} SET deleted_at = ?1 WHERE execution_date < ?2 AND deleted_at IS NULL",
                    partition.table_name
                ),
                params![format_time(Utc::now()), cutoff],
            ),
            CleanupMode::Hard => conn.execute(
                &format!(
                    "DELETE FROM {} WHERE execution_date < ?1",
                    partition.table_name
                ),
                params![cutoff],
            ),
        }
        .with_context_fn(|| format!("Failed to clean up {}", partition.table_name))?;

        Ok(affected)
    }
}

fn select_records(
    conn: &Connection,
    partition: &Partition,
    filter: &ExecutionFilter,
) -> Result<Vec<ExecutionRecord>> {
    let (clause, mut values) = filter.where_clause();
    let mut sql = format!(
        "SELECT {} FROM {} {} ORDER BY started_at DESC",
        COLUMNS, partition.table_name, clause
    );
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push(SqlValue::Integer(limit as i64));
    }

    let mut stmt = conn
        .prepare(&sql)
        .with_context_fn(|| format!("Failed to prepare query on {}", partition.table_name))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            map_record(row, partition.agent_type)
        })
        .with_context_fn(|| format!("Failed to query {}", partition.table_name))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .with_context_fn(|| format!("Failed to read rows from {}", partition.table_name))
}

fn map_record(row: &Row<'_>, agent_type: AgentType) -> rusqlite::Result<ExecutionRecord> {
    let json_list = |idx: usize| -> rusqlite::Result<Vec<String>> {
        let raw: String = row.get(idx)?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    };
    let json_map = |idx: usize| -> rusqlite::Result<Map<String, Value>> {
        let raw: String = row.get(idx)?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    };

    Ok(ExecutionRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        agent_type,
        agent_name: row.get(3)?,
        stock_code: row.get(4)?,
        execution_date: parse_date(5, &row.get::<_, String>(5)?)?,
        started_at: parse_time(6, &row.get::<_, String>(6)?)?,
        completed_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_time(7, &s))
            .transpose()?,
        processing_time_ms: row.get::<_, Option<i64>>(8)?.map(|ms| ms.max(0) as u64),
        input_tokens: row.get(9)?,
        output_tokens: row.get(10)?,
        total_tokens: row.get(11)?,
        model: row.get(12)?,
        cost_usd: row.get(13)?,
        execution_status: ExecutionStatus::parse_or_default(&row.get::<_, String>(14)?),
        error_message: row.get(15)?,
        score: row.get(16)?,
        recommendation: row
            .get::<_, Option<String>>(17)?
            .map(|r| Recommendation::parse_or_default(&r)),
        confidence: row.get(18)?,
        analysis: row.get(19)?,
        key_insights: json_list(20)?,
        risks: json_list(21)?,
        supporting_data: json_map(22)?,
        metadata: json_map(23)?,
        deleted_at: row
            .get::<_, Option<String>>(24)?
            .map(|s| parse_time(24, &s))
            .transpose()?,
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Fixed-width UTC so lexical order is time order
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
