//! stemq server - wires the local adapters into the queue and serves the
//! HTTP control surface.

use stemq::adapters::local::http::{self, AppState};
use stemq::adapters::local::{
    EventHub, HttpFetcher, Janitor, JsonFileStore, ProcessSupervisor, SystemInhibitor,
};
use stemq::application::queue::QueueManager;
use stemq::application::runner::JobRunner;
use stemq::application::status::StatusStore;
use stemq::config::AppConfig;
use std::error::Error;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = AppConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // 1. Leftovers from a previous run
    let janitor = Janitor::new(&config.tmp_dir);
    let swept = janitor.sweep_orphans().await;
    if swept > 0 {
        info!("Removed {} orphaned workspaces", swept);
    }

    // 2. Adapters
    let store = Arc::new(JsonFileStore::open(&config.store_path)?);
    let hub = Arc::new(EventHub::new());
    let tools = config.tools();
    let process = Arc::new(ProcessSupervisor::new(&tools));
    let fetcher = Arc::new(HttpFetcher::new(config.source_url_template.clone()));
    let inhibitor = Arc::new(SystemInhibitor::new());

    // 3. Application services
    let status = Arc::new(StatusStore::load(store, hub));
    let runner = Arc::new(JobRunner::new(
        status.clone(),
        process,
        fetcher,
        janitor,
        inhibitor,
        tools,
        config.models_dir.clone(),
    ));
    let (queue, work_rx) = QueueManager::new(status.clone(), runner);
    tokio::spawn(queue.clone().run(work_rx));

    // 4. HTTP layer
    let app = http::router(AppState { queue, status });
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port)).await?;
    info!("Listening at {}:{}", config.addr, config.port);
    axum::serve(listener, app).await?;
    Ok(())
}
