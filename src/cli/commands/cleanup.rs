//! Cleanup Command
//!
//! Apply the retention window to every execution partition.

use crate::cli::Output;
use crate::cli::util::CommandContext;
use crate::storage::CleanupMode;
use crate::types::Result;

pub fn run(ctx: &CommandContext, days: Option<u32>, hard: bool) -> Result<()> {
    let retention_days = days.unwrap_or(ctx.config.storage.retention_days);
    let mode = if hard {
        CleanupMode::Hard
    } else {
        CleanupMode::Soft
    };

    let report = ctx.executions().cleanup(retention_days, mode)?;
    let out = Output::new();

    for partition in report.partitions.iter().filter(|p| p.affected > 0) {
        println!(
            "  {:<28} {}",
            partition.table_name, partition.affected
        );
    }
    for failure in &report.failed {
        out.warning(&format!("{}: {}", failure.table_name, failure.error));
    }

    let verb = match mode {
        CleanupMode::Soft => "Soft-deleted",
        CleanupMode::Hard => "Deleted",
    };
    out.success(&format!(
        "{} {} records dated before {}",
        verb,
        report.total_affected(),
        report.cutoff
    ));
    Ok(())
}
