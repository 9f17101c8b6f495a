use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::batch::{BatchError, BatchService};
use crate::operation::{LlmOptions, OperationError, OperationKind, Part, TtsOptions};
use crate::project::{validate_project_id, ProjectError, ProjectInfo, ProjectSummary};
use crate::status::StatusSummary;
use crate::storage::{Record, RecordUpdate, StatusRow, StatusTableInfo, StorageError};
use crate::transcript::{self, ImportResult};

/// Shared state for the HTTP API
#[derive(Clone)]
pub struct AppState {
    pub batch: BatchService,
}

impl AppState {
    pub fn new(batch: BatchService) -> Self {
        Self { batch }
    }
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::RecordNotFound { .. } => ApiError::NotFound(e.to_string()),
            StorageError::Database(_) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<ProjectError> for ApiError {
    fn from(e: ProjectError) -> Self {
        match e {
            ProjectError::NotFound(_) => ApiError::NotFound(e.to_string()),
            ProjectError::InvalidId(_) => ApiError::BadRequest(e.to_string()),
            ProjectError::Io(_) | ProjectError::Json(_) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<OperationError> for ApiError {
    fn from(e: OperationError) -> Self {
        match e {
            OperationError::RecordNotFound(_) => ApiError::NotFound(e.to_string()),
            OperationError::InvalidRequest(_) => ApiError::BadRequest(e.to_string()),
            OperationError::Backend(_) => ApiError::BadGateway(e.to_string()),
            OperationError::Storage(inner) => inner.into(),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::Storage(inner) => inner.into(),
            BatchError::Project(inner) => inner.into(),
            BatchError::Operation(inner) => inner.into(),
            BatchError::AlreadyRunning(_) => ApiError::Conflict(e.to_string()),
            BatchError::RecordNotFound { .. } => ApiError::NotFound(e.to_string()),
            BatchError::TaskFailed(_) => ApiError::InternalError(e.to_string()),
        }
    }
}

fn checked_id(project_id: &str) -> Result<(), ApiError> {
    validate_project_id(project_id).map_err(ApiError::from)
}

/// Optional JSON body. An empty body means defaults; anything
/// else must parse in full.
fn json_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))
}

// API request/response types
#[derive(Debug, Default, Deserialize)]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub id: Option<String>,
    /// Initial `.info` fields (`title`, `desc`, `interviewer`, ...)
    #[serde(flatten)]
    pub info: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateProjectResponse {
    pub ok: bool,
    pub project_id: String,
    /// The `.info` document as stored
    pub saved: Value,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub date: NaiveDate,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    /// Transcript text already extracted from the source document
    pub text: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub project_id: String,
    pub kind: OperationKind,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct AudioResponse {
    /// URLs under `/voices`
    pub files: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusRowsResponse {
    pub rows: Vec<StatusRow>,
    /// Operation that created the table; absent when there is none
    pub table: Option<StatusTableInfo>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

/// Map an absolute audio path to its `/voices/...` URL.
fn voice_url(state: &AppState, path: &std::path::Path) -> String {
    let data_dir = state.batch.projects().data_dir();
    let relative: PathBuf = path.strip_prefix(data_dir).unwrap_or(path).to_path_buf();
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/voices/{}", parts.join("/"))
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/projects
pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<ProjectSummary>>, ApiError> {
    Ok(Json(state.batch.projects().list_projects().await?))
}

/// POST /api/projects
/// Body is optional; without an `id` one is generated. Any other fields are
/// merged into the new project's `.info`.
pub async fn create_project(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateProjectResponse>), ApiError> {
    let request: CreateProjectRequest = json_body(&body)?;
    let projects = state.batch.projects();
    let project_id = projects.create_project(request.id.as_deref()).await?;
    let saved = if request.info.is_empty() {
        projects.read_raw(&project_id).await
    } else {
        projects.write_info(&project_id, &Value::Object(request.info)).await?
    };
    Ok((
        StatusCode::CREATED,
        Json(CreateProjectResponse {
            ok: true,
            project_id,
            saved,
        }),
    ))
}

/// DELETE /api/projects/:id
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state.batch.delete_project(&project_id).await?;
    Ok(Json(DeletedResponse { deleted: true }))
}

/// GET /api/projects/:id/info
pub async fn get_project_info(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectInfo>, ApiError> {
    checked_id(&project_id)?;
    Ok(Json(state.batch.projects().read_info(&project_id).await))
}

/// POST /api/projects/:id/info
/// Deep-merges the body into the stored info and returns the saved JSON.
pub async fn update_project_info(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    if !body.is_object() {
        return Err(ApiError::BadRequest("info body must be a JSON object".to_string()));
    }
    let saved = state.batch.projects().write_info(&project_id, &body).await?;
    Ok(Json(saved))
}

/// GET /api/projects/:id/logs?date=YYYY-MM-DD
pub async fn get_project_log(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogResponse>, ApiError> {
    checked_id(&project_id)?;
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let content = state.batch.logger().read(&project_id, Some(date)).await;
    Ok(Json(LogResponse { date, content }))
}

/// GET /api/projects/:id/logs/files
pub async fn list_project_log_files(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    checked_id(&project_id)?;
    Ok(Json(state.batch.logger().list_files(&project_id).await))
}

/// POST /api/records/:id/import
pub async fn import_records(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportResult>, ApiError> {
    checked_id(&project_id)?;
    let _guard = state.batch.claim(&project_id)?;
    let result = transcript::import(
        state.batch.records().as_ref(),
        state.batch.logger(),
        &project_id,
        &request.text,
        request.overwrite,
    )
    .await?;
    Ok(Json(result))
}

/// GET /api/records/:id
pub async fn list_records(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<Record>>, ApiError> {
    checked_id(&project_id)?;
    Ok(Json(state.batch.records().list_records(&project_id).await?))
}

/// PATCH /api/records/:id/:num
pub async fn update_record(
    State(state): State<AppState>,
    Path((project_id, num)): Path<(String, i64)>,
    Json(update): Json<RecordUpdate>,
) -> Result<Json<Record>, ApiError> {
    checked_id(&project_id)?;
    let record = state
        .batch
        .records()
        .update_record(&project_id, num, &update)
        .await?;
    state
        .batch
        .logger()
        .info(&project_id, format!("record num={} updated", num))
        .await;
    Ok(Json(record))
}

/// POST /api/llm/start/:id
/// Returns once the status table exists; the run continues in the background.
pub async fn start_llm(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let options = json_body(&body)?;
    let handle = state.batch.start_llm(&project_id, options).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            project_id: handle.project_id.clone(),
            kind: OperationKind::Llm,
            total: handle.total,
        }),
    ))
}

/// POST /api/tts/start/:id
pub async fn start_tts(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let options = json_body(&body)?;
    let handle = state.batch.start_tts(&project_id, options).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            project_id: handle.project_id.clone(),
            kind: OperationKind::Tts,
            total: handle.total,
        }),
    ))
}

/// GET /api/{llm,tts}/check_status/:id
/// Always answers with a summary, even for unknown projects.
pub async fn check_status(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Json<StatusSummary> {
    if validate_project_id(&project_id).is_err() {
        return Json(StatusSummary::default());
    }
    Json(state.batch.summary(&project_id).await)
}

/// GET /api/{llm,tts}/status_rows/:id
pub async fn status_rows(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Json<StatusRowsResponse> {
    if validate_project_id(&project_id).is_err() {
        return Json(StatusRowsResponse {
            rows: Vec::new(),
            table: None,
        });
    }
    Json(StatusRowsResponse {
        rows: state.batch.rows(&project_id).await,
        table: state.batch.status_table(&project_id).await,
    })
}

/// POST /api/llm/process/:id/:num
pub async fn process_record(
    State(state): State<AppState>,
    Path((project_id, num)): Path<(String, i64)>,
    body: Bytes,
) -> Result<Json<Record>, ApiError> {
    checked_id(&project_id)?;
    let options = json_body(&body)?;
    let record = state.batch.process_llm_one(&project_id, num, options).await?;
    Ok(Json(record))
}

/// POST /api/tts/:id/:num
pub async fn synthesize_record(
    State(state): State<AppState>,
    Path((project_id, num)): Path<(String, i64)>,
    body: Bytes,
) -> Result<Json<AudioResponse>, ApiError> {
    checked_id(&project_id)?;
    let options = json_body(&body)?;
    let paths = state.batch.synthesize_one(&project_id, num, options).await?;
    let files = paths.iter().map(|p| voice_url(&state, p)).collect();
    Ok(Json(AudioResponse { files }))
}

/// DELETE /api/tts/:id/:num/:part
/// `part` is `pregunta`, `respuesta` or `all`.
pub async fn delete_audio(
    State(state): State<AppState>,
    Path((project_id, num, part)): Path<(String, i64, String)>,
) -> Result<Json<AudioResponse>, ApiError> {
    checked_id(&project_id)?;
    let part: Part = part.parse()?;
    let removed = state
        .batch
        .projects()
        .delete_audio(&project_id, num, &part.sides())
        .await;
    let files = removed.iter().map(|p| voice_url(&state, p)).collect();
    Ok(Json(AudioResponse { files }))
}
