use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use std::path::Path;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::WebConfig;

use super::api::{
    check_status, create_project, delete_audio, delete_project, get_project_info,
    get_project_log, health_check, import_records, list_project_log_files, list_projects,
    list_records, process_record, start_llm, start_tts, status_rows, synthesize_record,
    update_project_info, update_record, AppState,
};

/// API routes plus static audio under `/voices`. Any origin may call the
/// API; the browser client is served separately.
pub fn build_router(state: AppState, data_dir: &Path) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", delete(delete_project))
        .route("/api/projects/:id/info", get(get_project_info).post(update_project_info))
        .route("/api/projects/:id/logs", get(get_project_log))
        .route("/api/projects/:id/logs/files", get(list_project_log_files))
        .route("/api/records/:id/import", post(import_records))
        .route("/api/records/:id", get(list_records))
        .route("/api/records/:id/:num", patch(update_record))
        .route("/api/llm/start/:id", post(start_llm))
        .route("/api/llm/check_status/:id", get(check_status))
        .route("/api/llm/status_rows/:id", get(status_rows))
        .route("/api/llm/process/:id/:num", post(process_record))
        .route("/api/tts/start/:id", post(start_tts))
        .route("/api/tts/check_status/:id", get(check_status))
        .route("/api/tts/status_rows/:id", get(status_rows))
        .route("/api/tts/:id/:num", post(synthesize_record))
        .route("/api/tts/:id/:num/:part", delete(delete_audio))
        .with_state(state);

    api_routes
        .nest_service("/voices", ServeDir::new(data_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the web server and run until `shutdown_rx` flips to true.
pub async fn run_server(
    state: AppState,
    web_config: WebConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let data_dir = state.batch.projects().data_dir().to_path_buf();
    let app = build_router(state, &data_dir);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!("Web server listening on {}", web_config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}
