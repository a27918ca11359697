/*
 * Transpage worker
 *
 * Hosts the job runner: update, render and message index rebuild jobs.
 * Producers and workers meet in the SQLite file named by `db_path`
 * (or TRANSPAGE_DB).
 *
 * Usage:
 *   transpage-worker --config transpage.yaml work
 *   transpage-worker --config transpage.yaml work --once
 *   transpage-worker --config transpage.yaml enqueue "Main Page"
 *
 * Log filter: RUST_LOG (default `transpage=info`)
 */

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use transpage_orchestration::{
    queue_from_config, Job, JobQueue, OrchestratorConfig, Ports, Services,
};
use transpage_storage::PageTitle;

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "transpage-worker", about = "Runs translatable page jobs")]
struct Args {
    /// YAML configuration file; defaults and TRANSPAGE_* apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run jobs from the shared queue
    Work {
        /// Drain ready jobs and exit instead of polling
        #[arg(long)]
        once: bool,

        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Queue a resync of a marked page: renders and message index rebuild
    Enqueue {
        /// Source page title
        page: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<OrchestratorConfig> {
    let config = match path {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let mut config = OrchestratorConfig::default();
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
    };
    if config.db_path.is_none() {
        bail!("no database configured: set db_path or TRANSPAGE_DB");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("transpage=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Enqueue { page } => {
            let page = PageTitle::new(page)?;
            let queue = queue_from_config(&config)?;
            let job = Job::update_translatable_page(&page, &[]);
            let id = job.id;
            queue.enqueue(job).await?;
            info!("Queued job {} for {}", id, page);
            Ok(())
        }
        Command::Work { once, workers } => {
            if let Some(workers) = workers {
                config.workers = workers;
                config.validate()?;
            }
            work(config, once).await
        }
    }
}

async fn work(config: OrchestratorConfig, once: bool) -> anyhow::Result<()> {
    let ports = Ports::from_config(&config)?;
    let queue = queue_from_config(&config)?;
    let services = Services::new(config, ports, queue, Vec::new())?;
    let groups = services.group_index.recache().await?;
    info!("Loaded {} message groups", groups);

    if once {
        let executed = services.runner().run_until_idle().await?;
        info!("Executed {} jobs", executed);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let mut workers = Vec::with_capacity(services.config.workers);
    for _ in 0..services.config.workers {
        let runner = services.runner();
        let cancel = cancel.clone();
        workers.push(tokio::spawn(async move { runner.run_worker(cancel).await }));
    }
    info!("Started {} workers", workers.len());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");
    cancel.cancel();

    for result in join_all(workers).await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Worker failed: {}", e),
            Err(e) => error!("Worker task panicked: {}", e),
        }
    }
    Ok(())
}
