use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use rnaseq_orchestrator::domain::job_graph::task::TaskState;
use rnaseq_orchestrator::domain::pipeline::{Pipeline, PipelineOutcome};
use rnaseq_orchestrator::domain::results::aggregator::AggregationMode;
use rnaseq_orchestrator::domain::scheduler::dispatcher::Dispatcher;
use rnaseq_orchestrator::domain::scheduler::run_state::RunState;
use rnaseq_orchestrator::domain::scheduler::run_status::StateCounts;
use rnaseq_orchestrator::domain::scheduler::scheduler_config::{ResumeOptions, SchedulerConfig};
use rnaseq_orchestrator::{load_pipeline, load_settings, logger};

#[derive(Parser)]
#[command(name = "rnaseq-orchestrator")]
#[command(about = "Schedules splicing-event quantification of RNA-Seq samples on a compute cluster")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the job graph and run it to completion.
    Run(SettingsArgs),

    /// Continue a persisted run.
    Resume {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Give permanently failed and blocked tasks a fresh attempt budget.
        #[arg(long)]
        retry_failed: bool,
    },

    /// Print task counts of the persisted run.
    Status(SettingsArgs),

    /// Merge the quantification results of the persisted run.
    Aggregate {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Emit `missing` rows instead of refusing incomplete results.
        #[arg(long)]
        partial: bool,
    },
}

#[derive(Args)]
struct SettingsArgs {
    /// Pipeline settings (JSON).
    #[arg(short, long)]
    settings: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let pipeline = load_pipeline(&args.settings).context("could not assemble pipeline")?;
            let dispatcher = attach(&pipeline);
            let outcome = pipeline.run(&dispatcher).await.context("run failed")?;
            print_outcome(&outcome);
        }
        Commands::Resume { settings, retry_failed } => {
            let pipeline = load_pipeline(&settings.settings).context("could not assemble pipeline")?;
            let dispatcher = attach(&pipeline);
            let outcome = pipeline.resume(&dispatcher, ResumeOptions { retry_failed }).await.context("resume failed")?;
            print_outcome(&outcome);
        }
        Commands::Status(args) => {
            let settings = load_settings(&args.settings)?;
            let config = SchedulerConfig::try_from(&settings)?;
            let snapshot_path = config.snapshot_path.context("no snapshot path configured")?;
            let graph = RunState::load_graph(&snapshot_path).with_context(|| format!("could not read run state '{}'", snapshot_path.display()))?;

            let counts = StateCounts::from_states(graph.tasks().map(|t| t.state));
            print_counts(&counts);
            for task in graph.tasks().filter(|t| matches!(t.state, TaskState::FailedPermanent | TaskState::Blocked)) {
                println!("  {} {}", task.state.to_string().red(), task.id);
            }
        }
        Commands::Aggregate { settings, partial } => {
            let mut pipeline = load_pipeline(&settings.settings).context("could not assemble pipeline")?;
            if partial {
                let spec = pipeline.output_spec().clone().with_mode(AggregationMode::Partial);
                pipeline = pipeline.with_output_spec(spec);
            }
            let summary = pipeline.aggregate().context("aggregation failed")?;
            println!(
                "{} {} row(s), {} missing, written to '{}'",
                "Summary:".bold(),
                summary.len(),
                summary.missing_count(),
                pipeline.summary_path().display()
            );
        }
    }

    Ok(())
}

/// Dispatcher wired to Ctrl-C and to progress logging.
fn attach(pipeline: &Pipeline) -> Dispatcher {
    let dispatcher = pipeline.dispatcher();

    let token = dispatcher.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling run.");
            token.cancel();
        }
    });

    let mut status = dispatcher.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            log::info!(
                "Iteration {}: {} of {} task(s) terminal, {} in flight.",
                current.iteration,
                current.counts.terminal(),
                current.counts.total(),
                current.counts.in_flight()
            );
            if current.finished {
                break;
            }
        }
    });

    dispatcher
}

fn print_counts(counts: &StateCounts) {
    println!(
        "{} {} | {} {} | {} {} | {} {} | {} {}",
        "success".green(),
        counts.success,
        "failed".red(),
        counts.failed_permanent,
        "blocked".yellow(),
        counts.blocked,
        "cancelled".yellow(),
        counts.cancelled,
        "pending".blue(),
        counts.total() - counts.terminal()
    );
}

fn print_outcome(outcome: &PipelineOutcome) {
    let report = &outcome.report;
    let line = report.summary_line();
    if report.is_complete() {
        println!("{} {}", "Run complete:".green().bold(), line);
    } else if report.cancelled {
        println!("{} {}", "Run cancelled:".yellow().bold(), line);
    } else {
        println!("{} {}", "Run finished with failures:".red().bold(), line);
    }

    for task in report.tasks.iter().filter(|t| t.state == TaskState::FailedPermanent) {
        println!("  {} {}: {}", "failed".red(), task.task_id, task.last_error.as_deref().unwrap_or("no message"));
    }

    if let Some(summary) = &outcome.summary {
        println!("{} {} row(s) in '{}'", "Summary:".bold(), summary.len(), outcome.summary_path.display());
    }
    if !outcome.incomplete.is_empty() {
        println!("{} {} quantify task(s) without output; rerun `aggregate --partial` to emit missing rows", "Summary refused:".red().bold(), outcome.incomplete.len());
    }
}
