//! Taskplane server binary
//!
//! Loads configuration, restores durable state (job snapshot, breaker
//! files), starts the lease reaper and snapshot loops plus the internal
//! runner pool, and serves the HTTP control surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskplane::events::{EventBus, JsonlEventLog};
use taskplane::orchestrator::Orchestrator;
use taskplane::runner::InternalRunner;
use taskplane::server;
use taskplane::Config;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address (overrides config)
    #[arg(long)]
    addr: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for durable state: breaker files, job snapshot, event log
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Repository root that pins resolve against
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Lease reaper interval in seconds
    #[arg(long, default_value_t = 5)]
    reap_secs: u64,

    /// Job snapshot interval in seconds
    #[arg(long, default_value_t = 15)]
    snapshot_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("loading config")?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(dir) = args.state_dir {
        config.state_dir = Some(dir);
    }
    if let Some(root) = args.repo_root {
        config.repo_root = Some(root);
    }

    let bus = match &config.state_dir {
        Some(dir) => {
            let log = JsonlEventLog::open(dir.join("events.jsonl")).context("opening event log")?;
            EventBus::with_sink(log).shared()
        }
        None => EventBus::new().shared(),
    };

    let addr = config.server.addr.clone();
    let orchestrator =
        Arc::new(Orchestrator::new(config, bus).context("building orchestrator")?);

    // Lease reaper: requeues expired claims, escalates poison jobs
    {
        let orchestrator = Arc::clone(&orchestrator);
        let interval = Duration::from_secs(args.reap_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match orchestrator.reap() {
                    Ok(0) => {}
                    Ok(n) => info!(count = n, "Lease sweep changed jobs"),
                    Err(e) => warn!("Lease sweep failed: {}", e),
                }
            }
        });
    }

    // Durable job snapshot for crash recovery
    {
        let orchestrator = Arc::clone(&orchestrator);
        let interval = Duration::from_secs(args.snapshot_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = orchestrator.persist() {
                    warn!("Job snapshot failed: {}", e);
                }
            }
        });
    }

    // Internal execution pool (no-op without configured executors)
    let handles = InternalRunner::spawn(Arc::clone(&orchestrator));
    if !handles.is_empty() {
        info!(loops = handles.len(), "Internal runner pool started");
    }

    let app = server::router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "Taskplane control plane listening");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
