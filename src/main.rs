use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chrono::NaiveDate;
use tickerlens::cli::commands::{
    analyze::AnalyzeOptions, history::HistoryOptions, stats::StatsOptions,
};
use tickerlens::cli::{CommandContext, OutputFormat, parse_date};
use tickerlens::types::AgentType;

#[derive(Parser)]
#[command(name = "tickerlens")]
#[command(version, about = "Multi-analyst LLM equity research with sharded execution history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the global/project chain
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every analyst on one stock and print the decision
    Analyze {
        #[arg(help = "Stock code, e.g. 600519")]
        stock_code: String,
        #[arg(long, help = "Reuse a session ID instead of generating one")]
        session: Option<String>,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: OutputFormat,
        #[arg(short = 'o', long, help = "Also write the markdown report to this file")]
        output: Option<PathBuf>,
        #[arg(long, help = "Skip report notifications")]
        no_notify: bool,
    },

    /// Show past runs, or analyst executions with --executions
    History {
        #[arg(long, help = "Only this stock")]
        stock: Option<String>,
        #[arg(long, help = "Only this session (implies --executions)")]
        session: Option<String>,
        #[arg(long = "agent", help = "Analyst partition to read (repeatable, implies --executions)")]
        agents: Vec<AgentType>,
        #[arg(long, value_parser = parse_date, help = "From date, YYYY-MM-DD")]
        since: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date, help = "Until date, YYYY-MM-DD")]
        until: Option<NaiveDate>,
        #[arg(long, help = "Only failed executions")]
        errors: bool,
        #[arg(long, help = "Include soft-deleted executions")]
        include_deleted: bool,
        #[arg(long, help = "List analyst executions instead of runs")]
        executions: bool,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: OutputFormat,
    },

    /// Aggregate execution statistics across partitions
    Stats {
        #[arg(long)]
        stock: Option<String>,
        #[arg(long = "agent", help = "Analyst partition (repeatable)")]
        agents: Vec<AgentType>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, value_parser = parse_date)]
        since: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date)]
        until: Option<NaiveDate>,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: OutputFormat,
    },

    /// Remove execution records older than the retention window
    Cleanup {
        #[arg(long, help = "Retention in days (default: storage.retention_days)")]
        days: Option<u32>,
        #[arg(long, help = "Delete rows instead of marking them deleted")]
        hard: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(short = 'f', long, default_value = "toml", help = "Output format: toml, json")]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Write a default configuration file
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mTickerLens encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace with RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Analyze {
            stock_code,
            session,
            format,
            output,
            no_notify,
        } => {
            let ctx = CommandContext::load(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(tickerlens::cli::commands::analyze::run(
                ctx,
                AnalyzeOptions {
                    stock_code,
                    session_id: session,
                    format,
                    output,
                    notify: !no_notify,
                },
            ))?;
        }
        Commands::History {
            stock,
            session,
            agents,
            since,
            until,
            errors,
            include_deleted,
            executions,
            limit,
            format,
        } => {
            let ctx = CommandContext::load(config_path)?;
            tickerlens::cli::commands::history::run(
                &ctx,
                &HistoryOptions {
                    stock_code: stock,
                    session_id: session,
                    agents,
                    since,
                    until,
                    errors_only: errors,
                    include_deleted,
                    executions,
                    limit,
                    format,
                },
            )?;
        }
        Commands::Stats {
            stock,
            agents,
            model,
            since,
            until,
            format,
        } => {
            let ctx = CommandContext::load(config_path)?;
            tickerlens::cli::commands::stats::run(
                &ctx,
                &StatsOptions {
                    stock_code: stock,
                    agents,
                    model,
                    since,
                    until,
                    format,
                },
            )?;
        }
        Commands::Cleanup { days, hard } => {
            let ctx = CommandContext::load(config_path)?;
            tickerlens::cli::commands::cleanup::run(&ctx, days, hard)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                tickerlens::cli::commands::config::show(config_path, global, &format)?;
            }
            ConfigAction::Path => {
                tickerlens::cli::commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                tickerlens::cli::commands::config::init(global, force)?;
            }
        },
    }

    Ok(())
}
