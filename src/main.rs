use atelier::agents::AgentRegistry;
use atelier::api;
use atelier::collector::EventCollector;
use atelier::config::OrchestratorConfig;
use atelier::orchestrator::Orchestrator;
use atelier::scheduler::{spawn_maintenance_loop, spawn_scheduler_loop};
use atelier::store::OrchestratorStore;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use std::path::PathBuf;
use std::sync::Arc;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().compact();
    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = OrchestratorConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let store = OrchestratorStore::connect(&config.data_dir.join("orchestrator.db"))
        .await
        .context("opening orchestrator.db")?;
    let collector = Arc::new(
        EventCollector::connect(&config.marketplace_db)
            .await
            .context("opening marketplace db")?,
    );

    // Agents register here at process start. The registry starts empty;
    // deployments link their agent implementations in and register them
    // before the first cycle fires.
    let registry = Arc::new(AgentRegistry::new());

    let orchestrator = Orchestrator::new(registry, store, collector, config);

    let scheduler = spawn_scheduler_loop(orchestrator.clone());
    let maintenance = spawn_maintenance_loop(orchestrator.clone());

    let result = api::serve(orchestrator).await;

    scheduler.abort();
    maintenance.abort();
    result
}
