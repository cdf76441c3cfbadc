use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod catalog;
mod config;
mod dashboard;
mod engine;
mod error;
mod models;
mod payload;
mod session;
mod utils;

use crate::catalog::{AddressFamily, Catalog};
use crate::config::ImporterConfig;
use crate::dashboard::DashboardClient;
use crate::engine::{DirectRelay, Importer, ProxyRelay, TaskRelay};
use crate::models::{RunPhase, RunState};
use crate::session::{complete_base_url, SessionContext};

#[derive(Parser)]
#[command(author, version, about = "Bulk-import three-carrier latency probes into a Nezha dashboard")]
struct Args {
    /// JSON config file; defaults are used when it does not exist.
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Default)]
struct Target {
    /// Dashboard address, e.g. https://nezha.example.com:8008
    #[arg(long)]
    base_url: Option<String>,
    /// Cookie header copied from a logged-in dashboard session.
    #[arg(long)]
    cookie: Option<String>,
    /// Route requests through a running import proxy.
    #[arg(long)]
    proxy: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the import proxy.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check that the dashboard accepts the URL and cookie.
    Validate {
        #[command(flatten)]
        target: Target,
    },
    /// Create one probe per catalog entry.
    Import {
        #[arg(value_enum)]
        family: AddressFamily,
        /// Region → carrier → address JSON file instead of the bundled table.
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        duration: Option<u64>,
        #[arg(long)]
        max_latency: Option<u64>,
        #[arg(long)]
        min_latency: Option<u64>,
    },
}

fn init_tracing(level: &str) {
    // RUST_LOG still wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,reqwest=warn")));
    tracing_subscriber::fmt().with_env_filter(filter).with_ansi(true).init();
}

fn session_for(target: &Target, config: &ImporterConfig) -> SessionContext {
    let mut session = SessionContext::new(
        config.base_url.clone().unwrap_or_default(),
        config.cookie.clone().unwrap_or_default(),
    );
    // Flags win over the config file.
    if let Some(base_url) = &target.base_url {
        session.set_base_url(base_url.clone());
    }
    if let Some(cookie) = &target.cookie {
        session.set_credential(cookie.clone());
    }
    if !session.base_url().is_empty() {
        let completed = complete_base_url(session.base_url());
        session.set_base_url(completed);
    }
    session
}

fn relay_for(target: &Target, config: &ImporterConfig) -> Result<Box<dyn TaskRelay>> {
    if let Some(proxy) = target.proxy.clone().or_else(|| config.proxy_url.clone()) {
        info!(proxy = %proxy, "routing through import proxy");
        return Ok(Box::new(ProxyRelay::new(proxy)));
    }
    let http = reqwest::Client::builder().pool_idle_timeout(Duration::from_secs(90)).build()?;
    Ok(Box::new(DirectRelay::new(DashboardClient::new(http))))
}

fn print_run(state: &RunState) {
    for result in &state.results {
        println!("{}", utils::render_result(result));
    }
    if !state.message.is_empty() {
        println!("{}", state.message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::setup_console();

    let args = Args::parse();
    let config = ImporterConfig::load_or_default(&args.config)?;
    init_tracing(&config.log_level);

    match args.command {
        Command::Serve { port } => {
            let port = port.unwrap_or(config.api_port);
            let server = tokio::spawn(api::start_server(port, DashboardClient::default()));

            tokio::select! {
                res = server => res??,
                _ = signal::ctrl_c() => info!("Shutdown signal received. Closing import proxy..."),
            }
        }
        Command::Validate { target } => {
            let mut session = session_for(&target, &config);
            let importer = Importer::new(relay_for(&target, &config)?);
            let valid = importer.validate(&mut session).await;
            println!("{}", importer.snapshot().await.message);
            if !valid || !session.is_validated() {
                bail!("dashboard connection check failed");
            }
        }
        Command::Import { family, catalog, target, duration, max_latency, min_latency } => {
            let catalog = match catalog {
                Some(path) => Catalog::from_path(&path)?,
                None => Catalog::bundled(family)?,
            };
            let defaults = config.settings();
            let settings = models::ImportSettings {
                duration: duration.unwrap_or(defaults.duration),
                max_latency: max_latency.unwrap_or(defaults.max_latency),
                min_latency: min_latency.unwrap_or(defaults.min_latency),
            };

            let mut session = session_for(&target, &config);
            let importer = Importer::new(relay_for(&target, &config)?);
            info!(family = ?family, regions = catalog.regions().len(), tasks = catalog.total(), "importing catalog");

            let progress = importer.state();
            let reporter = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(5));
                loop {
                    ticker.tick().await;
                    let state = progress.lock().await;
                    if state.phase == RunPhase::Running {
                        info!("{}", state.message);
                    }
                }
            });

            let state = importer.run_batch(&mut session, &catalog, &settings).await;
            reporter.abort();
            print_run(&state);
            if state.phase == RunPhase::Aborted {
                bail!("import aborted");
            }
        }
    }

    Ok(())
}
