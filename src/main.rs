use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use deskwatch::application::worker::Worker;
use deskwatch::infrastructure::config::{Credentials, WorkerConfig};
use deskwatch::infrastructure::logging::init_logging_with_config;
use deskwatch::infrastructure::sqlite_store::SqliteDocumentStore;
use deskwatch::infrastructure::webdriver::WebDriverSessionFactory;

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DESKWATCH_CONFIG").ok())
        .unwrap_or_else(|| "config/deskwatch.json".to_string())
        .into()
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::load(&config_path()).await?;
    init_logging_with_config(&config.logging).context("Failed to initialize logging")?;

    let credentials = Credentials::from_env()?;
    let store = Arc::new(SqliteDocumentStore::connect(&config.store.database_url).await?);
    let session_factory = Box::new(WebDriverSessionFactory::new(
        config.webdriver.clone(),
        &config.timing,
    ));

    let mut worker = Worker::new(config, credentials, store, session_factory);

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                error!("Worker stopped unexpectedly: {e:#}");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting");
        }
    }

    Ok(())
}
