pub mod database;
pub mod execution_store;
pub mod runs;
pub mod shard;

pub use database::{Database, PoolConfig, SharedDatabase};
pub use execution_store::{
    CleanupMode, CleanupReport, ExecutionFilter, ExecutionRecord, ExecutionStats, ExecutionStatus,
    ExecutionStore, PartitionCleanup, PartitionFailure, TokenTotals,
};
pub use runs::{RunRecord, RunStatus, RunStore};
pub use shard::{Partition, ShardManager, table_name};
