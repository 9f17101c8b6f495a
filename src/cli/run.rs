use crate::backend::{BackendError, OpenAiLlmClient, OpenAiTtsClient};
use crate::batch::BatchService;
use crate::config::{load_config, system_config_path, user_config_path, ConfigError};
use crate::logger::ProjectLogger;
use crate::operation::VoiceDefaults;
use crate::project::ProjectStore;
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::StorageError;
use crate::web::{run_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("backend client error: {0}")]
    Backend(#[from] BackendError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            if let Some(user) = user_config_path() {
                eprintln!("  {}", user.display());
            }
            eprintln!("  {}", system_config_path().display());
            eprintln!("\nUse --config <path> to specify a config file, or run 'interview-tts config init' to generate one.");
            std::process::exit(1);
        }
    };

    serve(&config_path).await.map_err(|e| e.into())
}

async fn serve(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    tokio::fs::create_dir_all(&config.storage.data_dir).await?;

    info!(path = %config.storage.database.display(), "Initializing storage");
    let storage = Arc::new(DuckDbStorage::new(&config.storage.database)?);

    let logger = ProjectLogger::new(&config.storage.data_dir);
    let projects = ProjectStore::new(&config.storage.data_dir, logger.clone());
    let llm = Arc::new(OpenAiLlmClient::new(&config.llm)?);
    let tts = Arc::new(OpenAiTtsClient::new(&config.tts)?);

    let batch = BatchService::new(
        storage.clone(),
        storage,
        projects,
        logger,
        llm,
        tts,
        VoiceDefaults::from_config(&config.tts),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let web_config = config.web.clone();
    let mut web_handle = tokio::spawn(async move {
        run_server(AppState::new(batch), web_config, shutdown_rx).await
    });

    info!(data_dir = %config.storage.data_dir.display(), "Server started, press Ctrl+C to shutdown");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            web_handle.await??;
        }
        result = &mut web_handle => {
            if let Err(e) = &result {
                error!(error = %e, "Web server task failed");
            }
            result??;
        }
    }

    info!("Shutdown complete");
    Ok(())
}
