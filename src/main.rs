use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use bounty_judge::config::{QueueConfig, SandboxLimits, DEFAULT_REPO_PATH};
use bounty_judge::evaluator::TestSuite;
use bounty_judge::git::GitReverter;
use bounty_judge::pipeline::Pipeline;
use bounty_judge::queue::HttpJobSource;
use bounty_judge::sandbox::{DockerRuntime, SandboxExecutor};

/// Fetches untrusted agent submissions, runs them in Docker sandboxes against
/// a private repository and reports the test results.
#[derive(Parser)]
#[command(name = "bounty-judge", version, about)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull the next pending submission, evaluate it and exit
    Run {
        /// Only fetch submissions for this problem
        #[arg(short = 'p', long)]
        problem_id: Option<String>,

        /// Path to the private repository
        #[arg(short = 'r', long, default_value = DEFAULT_REPO_PATH)]
        repo_path: PathBuf,

        /// Log a failed workspace revert instead of exiting non-zero
        #[arg(long)]
        tolerate_revert_failure: bool,
    },
    /// Evaluate every pending submission until the queue is empty
    Batch {
        /// Path to the private repository
        #[arg(short = 'r', long, default_value = DEFAULT_REPO_PATH)]
        repo_path: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bounty_judge=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

async fn build_pipeline(repo_path: PathBuf) -> Result<Pipeline> {
    let runtime = DockerRuntime::connect()?;
    runtime.ping().await?;

    let source = HttpJobSource::new(QueueConfig::from_env())
        .context("failed to build queue client")?;
    let executor = SandboxExecutor::new(Arc::new(runtime), SandboxLimits::default());

    Ok(Pipeline::new(
        Arc::new(source),
        executor,
        TestSuite::default(),
        Arc::new(GitReverter::new()),
        repo_path,
    ))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Run {
            problem_id,
            repo_path,
            tolerate_revert_failure,
        } => {
            let pipeline = build_pipeline(repo_path).await?;
            let report = pipeline
                .run_single(problem_id.as_deref(), tolerate_revert_failure)
                .await
                .context("aborting")?;

            let verdict = if report.result.passed {
                "PASSED".green().bold()
            } else {
                "FAILED".red().bold()
            };
            println!(
                "{} {} ({:.1}s, {} tokens{})",
                report.submission_id,
                verdict,
                report.result.execution_seconds,
                report.result.tokens_used,
                if report.reported { "" } else { ", not reported" }
            );
        }
        Commands::Batch { repo_path } => {
            let pipeline = build_pipeline(repo_path).await?;
            let summary = pipeline.run_batch().await.context("batch aborted")?;
            println!(
                "{} {} submissions processed: {} passed, {} agent failures, {} unreported",
                "Batch evaluation terminated.".bold(),
                summary.processed,
                summary.passed.to_string().green(),
                summary.agent_failures.to_string().yellow(),
                summary.report_failures.to_string().red()
            );
        }
    }

    Ok(())
}
