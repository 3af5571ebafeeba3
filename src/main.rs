//! labeler - Entry point for the mailbox labeling engine

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use labeler::config::{load_dotenv, Settings};
use labeler::domain::Taxonomy;
use labeler::providers::ai::build_provider;
use labeler::providers::email::{GmailCredentials, GmailProvider};
use labeler::providers::http_client;
use labeler::services::{shutdown_signal, RunCoordinator, RunOptions, Scheduler, Trigger};

/// Labels recent mailbox threads against a fixed taxonomy using an LLM.
#[derive(Parser)]
#[command(name = "labeler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one labeling pass and exit
    Run {
        /// Only threads active in the last N days (defaults to DAYS_LOOKBACK)
        #[arg(long)]
        days: Option<u32>,

        /// Process at most N threads
        #[arg(long)]
        limit: Option<usize>,

        /// Reclassify every candidate
        #[arg(long)]
        force: bool,

        /// Who triggered the run, as recorded in the report
        #[arg(long, value_enum, default_value_t = TriggerArg::Manual)]
        trigger: TriggerArg,

        /// Print the full report as JSON instead of a summary line
        #[arg(long)]
        json: bool,
    },

    /// Run on a fixed interval until interrupted
    Schedule {
        /// Minutes between runs (defaults to SCHEDULE_INTERVAL_MINUTES)
        #[arg(long)]
        interval_minutes: Option<u64>,
    },

    /// Print the label taxonomy as JSON
    Taxonomy,
}

#[derive(Clone, Copy, ValueEnum)]
enum TriggerArg {
    Manual,
    Mcp,
}

impl From<TriggerArg> for Trigger {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Manual => Trigger::Manual,
            TriggerArg::Mcp => Trigger::Mcp,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Taxonomy => print_taxonomy(),
        Commands::Run {
            days,
            limit,
            force,
            trigger,
            json,
        } => {
            let settings = load_settings()?;
            let days = days.unwrap_or(settings.run.days_lookback);
            let options = RunOptions::new(days, trigger.into())
                .with_limit(limit)
                .with_force_rescan(force);
            let coordinator = build_coordinator(&settings).await?;

            let report = coordinator.run_once(&options).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Run Complete. Processed {} threads.",
                    report.stats.threads_scanned
                );
            }
            Ok(())
        }
        Commands::Schedule { interval_minutes } => {
            let settings = load_settings()?;
            let interval = match interval_minutes {
                Some(0) => anyhow::bail!("--interval-minutes must be greater than zero"),
                Some(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
                None => settings.run.schedule_interval(),
            };
            let options = RunOptions::new(settings.run.days_lookback, Trigger::Scheduler);
            let coordinator = Arc::new(build_coordinator(&settings).await?);

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                signal_token.cancel();
            });

            let runs = Scheduler::new(coordinator, options, interval)
                .run(shutdown)
                .await;
            tracing::info!(runs, "Scheduler exited");
            Ok(())
        }
    }
}

/// `RUST_LOG` directives when set and valid, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn print_taxonomy() -> Result<()> {
    let taxonomy = Taxonomy::builtin();
    let document = serde_json::json!({
        "version": taxonomy.version(),
        "categories": taxonomy.as_map(),
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn load_settings() -> Result<Settings> {
    load_dotenv();
    Settings::from_env().context("invalid configuration")
}

async fn build_coordinator(settings: &Settings) -> Result<RunCoordinator> {
    let client = http_client(settings.run.http_timeout()).context("failed to build HTTP client")?;

    let mailbox = GmailProvider::new(GmailCredentials {
        client_id: settings.google.client_id.clone(),
        client_secret: settings.google.client_secret.clone(),
        refresh_token: settings.google.refresh_token.clone(),
    })
    .with_client(client.clone());
    mailbox
        .authenticate()
        .await
        .context("Gmail authentication failed")?;

    let llm = build_provider(&settings.ai, client);

    tracing::info!(
        report_dir = %settings.run.report_dir.display(),
        "Labeler ready"
    );

    Ok(RunCoordinator::new(
        Arc::new(mailbox),
        llm,
        Arc::new(Taxonomy::builtin()),
        settings.run.report_dir.clone(),
    ))
}
