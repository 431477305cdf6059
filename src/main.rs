mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::Style;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use recruitflow::config::AppConfig;
use recruitflow::gateway::ModelGateway;
use recruitflow::health::HealthTracker;
use recruitflow::orchestrator::{Orchestrator, OrchestratorSettings};
use recruitflow::router::ProviderRouter;
use recruitflow::store::{JsonFileStore, StateStore};
use recruitflow::workflow::{Job, JobSummary, Stage};
use ui::JobBoard;

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("recruitflow={level}")));

    // Logs go to stderr so summaries on stdout stay clean.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Reads a job definition; `.json` files are JSON, anything else TOML.
fn load_job(path: &Path) -> Result<Job> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read job file {}", path.display()))?;
    let job = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .with_context(|| format!("invalid job JSON in {}", path.display()))?,
        _ => toml::from_str(&contents)
            .with_context(|| format!("invalid job TOML in {}", path.display()))?,
    };
    Ok(job)
}

async fn open_store(dir: &Path) -> Result<Arc<JsonFileStore>> {
    let store = JsonFileStore::open(dir)
        .await
        .with_context(|| format!("failed to open state directory {}", dir.display()))?;
    Ok(Arc::new(store))
}

fn build_orchestrator(
    config: &AppConfig,
    store: Arc<JsonFileStore>,
    offline: bool,
) -> Result<Orchestrator<JsonFileStore>> {
    let backends = config
        .backends(offline)
        .context("failed to set up model providers (use --offline to run without API keys)")?;
    let gateway = ModelGateway::from_config(config, backends)?;
    Ok(Orchestrator::new(
        store,
        Arc::new(gateway),
        OrchestratorSettings::from_config(config),
    ))
}

async fn run_jobs(orchestrator: Orchestrator<JsonFileStore>, job_ids: Vec<String>) -> Result<()> {
    let board = JobBoard::new();
    let orchestrator = orchestrator.with_observer(board.observer());
    info!(worker = orchestrator.worker_id(), jobs = job_ids.len(), "starting run");

    let results = orchestrator.run_all(job_ids).await;
    board.finish();

    let red = Style::new().red().bold();
    let mut unfinished = 0;
    for (job_id, result) in results {
        match result {
            Ok(summary) => {
                if summary.stage != Stage::Completed && summary.awaiting_review.is_empty() {
                    unfinished += 1;
                }
                ui::print_summary(&summary);
            }
            Err(e) => {
                unfinished += 1;
                eprintln!("{} {job_id}: {e}", red.apply_to("✗"));
            }
        }
    }
    if unfinished > 0 {
        bail!("{unfinished} job(s) did not complete");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level());

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let store_dir = cli.store.clone().unwrap_or_else(|| config.store_dir.clone());

    match cli.command {
        Command::Submit { file, run, offline } => {
            let job = load_job(&file)?;
            let store = open_store(&store_dir).await?;
            let orchestrator = build_orchestrator(&config, store, offline)?;
            let job_id = orchestrator.submit(job).await?;
            println!("{job_id}");
            if run {
                run_jobs(orchestrator, vec![job_id]).await?;
            }
        }
        Command::Run { job_ids, offline } => {
            let store = open_store(&store_dir).await?;
            let orchestrator = build_orchestrator(&config, store, offline)?;
            run_jobs(orchestrator, job_ids).await?;
        }
        Command::Status { job_id, json } => {
            let store = open_store(&store_dir).await?;
            let ids = match job_id {
                Some(id) => vec![id],
                None => store.list().await?,
            };
            let mut summaries = Vec::with_capacity(ids.len());
            for id in &ids {
                let state = store
                    .load(id)
                    .await
                    .with_context(|| format!("failed to load job {id}"))?;
                summaries.push(JobSummary::from_state(&state.value));
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if let [summary] = summaries.as_slice() {
                ui::print_summary(summary);
            } else {
                ui::print_status_table(&summaries);
            }
        }
        Command::Review {
            job_id,
            candidate_id,
            decision,
        } => {
            // Recording a decision never calls a model either.
            let store = open_store(&store_dir).await?;
            let orchestrator = build_orchestrator(&config, store, true)?;
            let summary = orchestrator
                .approve(&job_id, &candidate_id, decision.approved())
                .await?;
            ui::print_summary(&summary);
            if summary.awaiting_review.is_empty() {
                println!("\nresume with: recruitflow run {job_id}");
            }
        }
        Command::Cancel { job_id } => {
            // Cancelling never calls a model, so provider keys are not needed.
            let store = open_store(&store_dir).await?;
            let orchestrator = build_orchestrator(&config, store, true)?;
            let summary = orchestrator.cancel(&job_id).await?;
            ui::print_summary(&summary);
        }
        Command::Routes => {
            let providers = config.provider_ids();
            let health = Arc::new(HealthTracker::new(config.health_policy(), providers.clone()));
            let router = ProviderRouter::new(config.route_entries(), &providers, health)?;
            ui::print_routes(&router);
        }
    }

    Ok(())
}
