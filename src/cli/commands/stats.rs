//! Stats Command
//!
//! Aggregate execution records across partitions.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::cli::Output;
use crate::cli::util::{CommandContext, OutputFormat};
use crate::storage::{ExecutionFilter, ExecutionStats};
use crate::types::{AgentType, Result};

pub struct StatsOptions {
    pub stock_code: Option<String>,
    pub agents: Vec<AgentType>,
    pub model: Option<String>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub format: OutputFormat,
}

pub fn run(ctx: &CommandContext, options: &StatsOptions) -> Result<()> {
    let filter = ExecutionFilter {
        stock_code: options.stock_code.clone(),
        model: options.model.clone(),
        since: options.since,
        until: options.until,
        ..Default::default()
    };
    let stats = ctx.executions().stats(&options.agents, &filter);

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => print_text(&stats),
    }
    Ok(())
}

fn print_text(stats: &ExecutionStats) {
    let out = Output::new();
    out.header("Execution Statistics");

    if stats.total_executions == 0 {
        out.info("No executions recorded");
        return;
    }

    out.field("Executions", stats.total_executions);
    out.field(
        "Success rate",
        format!(
            "{:.1}% ({} ok)",
            stats.success_rate * 100.0,
            stats.success_count
        ),
    );
    out.field(
        "Avg time",
        stats
            .avg_processing_time_ms
            .map_or("-".to_string(), |ms| format!("{:.0}ms", ms)),
    );
    out.field(
        "Avg score",
        stats.avg_score.map_or("-".to_string(), |s| format!("{:.1}", s)),
    );
    out.field(
        "Tokens",
        format!(
            "{} ({} in / {} out)",
            stats.token_usage.total_tokens,
            stats.token_usage.input_tokens,
            stats.token_usage.output_tokens
        ),
    );
    if let Some(cost) = stats.total_cost_usd {
        out.field("Cost", format!("${:.4}", cost));
    }

    print_histogram(&out, "By Analyst", &stats.by_agent_type);
    print_histogram(&out, "By Model", &stats.by_model);
    print_histogram(&out, "Recommendations", &stats.recommendation_histogram);
}

fn print_histogram(out: &Output, title: &str, counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    out.section(title);
    for (key, count) in counts {
        println!("  {:<24} {}", key, count);
    }
}
