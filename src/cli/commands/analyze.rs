//! Analyze Command
//!
//! Run the full pipeline for one stock.
//!
//! Usage:
//!   tickerlens analyze 600519 [--session ID] [-f json] [-o report.md] [--no-notify]

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::ai::{GenerationConfig, ModelClient};
use crate::cli::Output;
use crate::cli::util::{CommandContext, OutputFormat};
use crate::pipeline::{
    AnalysisPipeline, AnalysisReport, AnalysisRequest, SnapshotDirSource, default_roster,
    notifier_from_config, render_markdown, run_until_cancelled,
};
use crate::types::{LensError, Result, SessionId};

pub struct AnalyzeOptions {
    pub stock_code: String,
    pub session_id: Option<String>,
    pub format: OutputFormat,
    /// Write the markdown report here as well
    pub output: Option<PathBuf>,
    pub notify: bool,
}

pub async fn run(ctx: CommandContext, options: AnalyzeOptions) -> Result<()> {
    let config = &ctx.config;

    let client = ModelClient::from_config(config)?;
    info!(backend = client.backend_name(), model = %config.llm.model, "Model client ready");
    let roster = default_roster(
        Arc::new(client),
        GenerationConfig::from_llm_config(&config.llm),
    )?;
    let source = Arc::new(SnapshotDirSource::new(&config.data.snapshot_dir));

    let mut pipeline = AnalysisPipeline::new(roster, source)
        .with_execution_store(Arc::new(ctx.executions()))
        .with_run_store(Arc::new(ctx.runs()));
    if options.notify {
        pipeline = pipeline.with_notifier(notifier_from_config(&config.notify)?);
    }

    let mut request = AnalysisRequest::new(&options.stock_code);
    request.session_id = options.session_id.map(SessionId::new);

    let out = Output::new();
    if options.format == OutputFormat::Text {
        out.info(&format!("Analyzing {} (Ctrl-C to cancel)", options.stock_code));
    }

    let result = run_until_cancelled(pipeline.run(request), async {
        // A failed handler install means Ctrl-C can't be observed; keep running
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await;

    let report = match result {
        Ok(report) => report,
        Err(LensError::EssentialDataMissing { stock_code, missing }) => {
            out.error(&format!("Essential data missing for {}", stock_code));
            for group in &missing {
                println!("  - {}", group);
            }
            return Err(LensError::EssentialDataMissing { stock_code, missing });
        }
        Err(err) => return Err(err),
    };

    if let Some(path) = &options.output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, render_markdown(&report)).await?;
    }

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_summary(&out, &report),
    }
    if let Some(path) = &options.output {
        out.success(&format!("Report written to {}", path.display()));
    }

    Ok(())
}

fn print_summary(out: &Output, report: &AnalysisReport) {
    let decision = &report.decision;
    let name = report.stock_name.as_deref().unwrap_or(&report.stock_code);

    out.header(&format!("{} ({})", name, report.stock_code));
    println!(
        "  {}  score {:.1}  confidence {:.0}%",
        out.recommendation(decision.recommendation),
        decision.overall_score,
        decision.confidence * 100.0
    );
    if decision.degraded {
        out.warning("Decision synthesizer failed; verdict averages the remaining analysts");
    }

    out.section("Key Decision Factors");
    for factor in &decision.key_decision_factors {
        println!("  • {}", factor);
    }

    out.section("Risks");
    for risk in &decision.risk_assessment {
        println!("  • {}", risk);
    }

    out.section("Action Plan");
    println!("  {}", decision.action_plan);

    out.section("Run");
    out.field("Session", &report.session_id);
    out.field(
        "Analysts",
        format!(
            "{} ({} failed)",
            report.total_agents(),
            report.failed_agents()
        ),
    );
    out.field("Model calls", report.metrics.api_calls);
    out.field("Tokens", report.metrics.total_tokens);
    if let Some(cost) = report.metrics.total_cost_usd {
        out.field("Cost", format!("${:.4}", cost));
    }
    out.field(
        "Duration",
        format!("{:.1}s", report.processing_time_ms as f64 / 1000.0),
    );

    let undelivered: Vec<&str> = report
        .notifications
        .iter()
        .filter(|n| !n.success)
        .map(|n| n.provider.as_str())
        .collect();
    if !undelivered.is_empty() {
        out.warning(&format!("Not delivered: {}", undelivered.join(", ")));
    }
}
