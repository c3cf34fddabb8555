//! Execution record partitions.
//!
//! One table per `AgentType`. Table names come from a fixed lookup built at
//! construction; tables are created on first access, at most once per
//! process, under a per-table mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use rusqlite::Connection;
use tracing::{debug, info};

use super::database::table_exists;
use crate::constants::store::TABLE_PREFIX;
use crate::types::{AgentType, Result, ResultExt};

/// Table name for an agent type's partition
pub fn table_name(agent_type: AgentType) -> String {
    format!("{}{}", TABLE_PREFIX, agent_type.as_str())
}

/// A resolved partition: the agent type and the table that holds its records
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    pub agent_type: AgentType,
    pub table_name: String,
}

/// Partition lookup plus lazy, idempotent table creation
#[derive(Debug)]
pub struct ShardManager {
    partitions: HashMap<AgentType, Partition>,
    /// Per-table flag: created (or found) in this process
    ready: DashMap<String, Arc<Mutex<bool>>>,
    creations: AtomicUsize,
}

impl Default for ShardManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardManager {
    pub fn new() -> Self {
        let partitions = AgentType::ALL
            .iter()
            .map(|&agent_type| {
                (
                    agent_type,
                    Partition {
                        agent_type,
                        table_name: table_name(agent_type),
                    },
                )
            })
            .collect();
        Self {
            partitions,
            ready: DashMap::new(),
            creations: AtomicUsize::new(0),
        }
    }

    pub fn partition(&self, agent_type: AgentType) -> Partition {
        self.partitions
            .get(&agent_type)
            .cloned()
            .unwrap_or_else(|| Partition {
                agent_type,
                table_name: table_name(agent_type),
            })
    }

    /// Resolve the partition, creating its table and indexes if this process
    /// has not seen it yet.
    pub fn ensure(&self, conn: &Connection, agent_type: AgentType) -> Result<Partition> {
        let partition = self.partition(agent_type);

        // Clone the Arc out so the map shard is not locked while creating
        let flag = self
            .ready
            .entry(partition.table_name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(false)))
            .clone();
        let mut ready = flag.lock().unwrap_or_else(|poisoned| {
            tracing::error!(table = %partition.table_name, "Partition lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        });

        if !*ready {
            if table_exists(conn, &partition.table_name)? {
                debug!(table = %partition.table_name, "Partition already present");
            } else {
                conn.execute_batch(&create_partition_sql(&partition.table_name))
                    .with_context_fn(|| {
                        format!("Failed to create partition {}", partition.table_name)
                    })?;
                self.creations.fetch_add(1, Ordering::SeqCst);
                info!(table = %partition.table_name, "Created execution partition");
            }
            *ready = true;
        }

        Ok(partition)
    }

    /// Tables this manager actually created
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }
}

fn create_partition_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {t} (
            id                 TEXT PRIMARY KEY,
            session_id         TEXT NOT NULL,
            agent_type         TEXT NOT NULL,
            agent_name         TEXT NOT NULL,
            stock_code         TEXT NOT NULL,
            execution_date     TEXT NOT NULL,
            started_at         TEXT NOT NULL,
            completed_at       TEXT,
            processing_time_ms INTEGER,
            input_tokens       INTEGER,
            output_tokens      INTEGER,
            total_tokens       INTEGER,
            model              TEXT,
            cost_usd           REAL,
            execution_status   TEXT NOT NULL,
            error_message      TEXT,
            score              REAL,
            recommendation     TEXT,
            confidence         REAL,
            analysis           TEXT,
            key_insights       TEXT NOT NULL DEFAULT '[]',
            risks              TEXT NOT NULL DEFAULT '[]',
            supporting_data    TEXT NOT NULL DEFAULT '{{}}',
            metadata           TEXT NOT NULL DEFAULT '{{}}',
            deleted_at         TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_{t}_stock_date ON {t} (stock_code, execution_date);
        CREATE INDEX IF NOT EXISTS idx_{t}_session ON {t} (session_id);
        CREATE INDEX IF NOT EXISTS idx_{t}_date ON {t} (execution_date);
        CREATE INDEX IF NOT EXISTS idx_{t}_status ON {t} (execution_status);
        "#,
        t = table
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::Database;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_table_names_distinct() {
        let names: HashSet<String> = AgentType::ALL.iter().map(|&t| table_name(t)).collect();
        assert_eq!(names.len(), AgentType::ALL.len());
        assert_eq!(table_name(AgentType::FundFlow), "agent_exec_fund_flow");
    }

    #[test]
    fn test_ensure_creates_table_and_indexes_once() {
        let db = Database::open_in_memory().unwrap();
        let shards = ShardManager::new();
        let conn = db.connection().unwrap();

        let partition = shards.ensure(&conn, AgentType::Technical).unwrap();
        shards.ensure(&conn, AgentType::Technical).unwrap();

        assert_eq!(partition.table_name, "agent_exec_technical");
        assert!(table_exists(&conn, "agent_exec_technical").unwrap());
        assert_eq!(shards.creations(), 1);
        assert!(!table_exists(&conn, "agent_exec_risk").unwrap());

        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND name LIKE 'idx_%'",
                ["agent_exec_technical"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 4);
    }

    #[test]
    fn test_existing_table_not_recreated() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection().unwrap();
        ShardManager::new().ensure(&conn, AgentType::Risk).unwrap();

        // A fresh process finds the table instead of creating it
        let shards = ShardManager::new();
        shards.ensure(&conn, AgentType::Risk).unwrap();
        assert_eq!(shards.creations(), 0);
    }

    #[test]
    fn test_concurrent_first_access_creates_once() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path().join("shards.db")).unwrap());
        let shards = Arc::new(ShardManager::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                let shards = Arc::clone(&shards);
                std::thread::spawn(move || {
                    let conn = db.connection().unwrap();
                    shards.ensure(&conn, AgentType::Valuation).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(shards.creations(), 1);
    }

    proptest! {
        #[test]
        fn prop_table_name_is_pure(index in 0usize..AgentType::ALL.len()) {
            let agent_type = AgentType::ALL[index];
            let shards = ShardManager::new();
            prop_assert_eq!(table_name(agent_type), table_name(agent_type));
            prop_assert_eq!(shards.partition(agent_type).table_name, table_name(agent_type));
        }
    }
}
