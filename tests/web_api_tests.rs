//! HTTP API exercised in-process with `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use interview_tts::backend::{
    BackendError, LlmBackend, LlmOutput, LlmRequest, SpeechRequest, TtsBackend,
};
use interview_tts::batch::BatchService;
use interview_tts::logger::ProjectLogger;
use interview_tts::operation::VoiceDefaults;
use interview_tts::project::ProjectStore;
use interview_tts::storage::duckdb::DuckDbStorage;
use interview_tts::web::{build_router, AppState};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tower::util::ServiceExt; // for `oneshot`

const TRANSCRIPT: &str = "Pregunta: ¿Cómo se llama?\nRespuesta: Me llamo Rosa.\n\
                          Pregunta: ¿De dónde es?\nRespuesta: De Soria.";

struct EchoLlm {
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl LlmBackend for EchoLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmOutput, BackendError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        Ok(LlmOutput {
            pregunta_limpia: Some(request.pregunta.to_uppercase()),
            respuesta_limpia: None,
            entonacion_p: Some("amable".to_string()),
            entonacion_r: Some("orgulloso".to_string()),
        })
    }
}

struct StubTts;

#[async_trait]
impl TtsBackend for StubTts {
    async fn synthesize(&self, _request: &SpeechRequest, out_path: &Path) -> Result<PathBuf, BackendError> {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(out_path, b"ID3").await?;
        Ok(out_path.to_path_buf())
    }
}

/// Test helper: router over a temp data dir
fn setup_app(dir: &TempDir, gate: Option<Arc<Semaphore>>) -> Router {
    let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
    let logger = ProjectLogger::new(dir.path());
    let projects = ProjectStore::new(dir.path(), logger.clone());
    let service = BatchService::new(
        storage.clone(),
        storage,
        projects,
        logger,
        Arc::new(EchoLlm { gate }),
        Arc::new(StubTts),
        VoiceDefaults {
            question: "onyx".to_string(),
            answer: "sage".to_string(),
        },
    );
    build_router(AppState::new(service), dir.path())
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, req).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Should parse JSON")
    };
    (status, value)
}

async fn create_and_import(app: &Router) {
    let (status, body) = send_json(app, request("POST", "/api/projects", Some(json!({"id": "p1"})))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["project_id"], "p1");

    let (status, body) = send_json(
        app,
        request("POST", "/api/records/p1/import", Some(json!({"text": TRANSCRIPT}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"], 2);
}

async fn wait_for_summary(app: &Router, uri: &str, done: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..200 {
        let (status, body) = send_json(app, request("GET", uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        if done(&body) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("summary at {} never reached the expected state", uri);
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);
    let (status, body) = send(&app, request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_project_lifecycle_and_records() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);
    create_and_import(&app).await;

    let (_, projects) = send_json(&app, request("GET", "/api/projects", None)).await;
    assert_eq!(projects.as_array().unwrap().len(), 1);
    assert_eq!(projects[0]["id"], "p1");

    let (_, records) = send_json(&app, request("GET", "/api/records/p1", None)).await;
    assert_eq!(records[1]["respuesta"], "De Soria.");

    let (status, updated) = send_json(
        &app,
        request("PATCH", "/api/records/p1/2", Some(json!({"notas": "revisar acento"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["notas"], "revisar acento");
    assert_eq!(updated["pregunta"], "¿De dónde es?");

    let (status, body) = send_json(
        &app,
        request("PATCH", "/api/records/p1/99", Some(json!({"notas": "x"}))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("99"));

    let (status, _) = send_json(&app, request("DELETE", "/api/projects/p1", None)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, records) = send_json(&app, request("GET", "/api/records/p1", None)).await;
    assert_eq!(records, json!([]));
    let (status, _) = send_json(&app, request("DELETE", "/api/projects/p1", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_project_info_merge_and_logs() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);
    create_and_import(&app).await;

    let (status, _) = send_json(
        &app,
        request(
            "POST",
            "/api/projects/p1/info",
            Some(json!({"title": "Rosa", "language": "en", "voices": {"interviewee": "coral"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, info) = send_json(&app, request("GET", "/api/projects/p1/info", None)).await;
    assert_eq!(info["title"], "Rosa");
    assert_eq!(info["interviewer"]["language"], "en");
    assert_eq!(info["interviewee"]["voice"], "coral");

    let (_, log) = send_json(&app, request("GET", "/api/projects/p1/logs", None)).await;
    assert!(log["content"].as_str().unwrap().contains("import: wrote 2 records"));

    let (_, files) = send_json(&app, request("GET", "/api/projects/p1/logs/files", None)).await;
    assert_eq!(files.as_array().unwrap().len(), 1);

    let (_, old) = send_json(&app, request("GET", "/api/projects/p1/logs?date=2001-01-01", None)).await;
    assert_eq!(old["content"], "");
}

#[tokio::test]
async fn test_progress_for_unknown_project_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);

    let (status, body) = send_json(&app, request("GET", "/api/llm/check_status/nadie", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"processed": 0, "failed": 0, "total": 0}));

    let (status, body) = send_json(&app, request("GET", "/api/tts/status_rows/nadie", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"rows": [], "table": null}));
}

#[tokio::test]
async fn test_llm_batch_over_http() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);
    create_and_import(&app).await;

    let (status, body) = send_json(&app, request("POST", "/api/llm/start/p1", None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["total"], 2);
    assert_eq!(body["kind"], "llm");

    let summary = wait_for_summary(&app, "/api/llm/check_status/p1", |s| s["processed"] == 2).await;
    assert_eq!(summary, json!({"processed": 2, "failed": 0, "total": 2}));

    let (_, rows) = send_json(&app, request("GET", "/api/llm/status_rows/p1", None)).await;
    assert_eq!(rows["rows"].as_array().unwrap().len(), 2);
    assert_eq!(rows["table"]["operation"], "llm");

    let (_, records) = send_json(&app, request("GET", "/api/records/p1", None)).await;
    assert_eq!(records[0]["pregunta"], "¿CÓMO SE LLAMA?");
    assert_eq!(records[0]["respuesta"], "Me llamo Rosa.");
    assert_eq!(records[0]["entonacion_r"], "orgulloso");
}

#[tokio::test]
async fn test_second_start_conflicts_while_running() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let app = setup_app(&dir, Some(gate.clone()));
    create_and_import(&app).await;

    let (status, _) = send_json(&app, request("POST", "/api/llm/start/p1", None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send_json(&app, request("POST", "/api/tts/start/p1", None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already running"));

    let (status, _) = send_json(
        &app,
        request("POST", "/api/records/p1/import", Some(json!({"text": TRANSCRIPT, "overwrite": true}))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    gate.add_permits(2);
    wait_for_summary(&app, "/api/llm/check_status/p1", |s| s["processed"] == 2).await;
}

#[tokio::test]
async fn test_single_record_tts_and_audio_delete() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);
    create_and_import(&app).await;

    let (status, body) = send_json(&app, request("POST", "/api/tts/p1/1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"], json!(["/voices/p1/1/p1.mp3", "/voices/p1/1/r1.mp3"]));

    let (status, audio) = send(&app, request("GET", "/voices/p1/1/p1.mp3", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audio, b"ID3");

    let (status, _) = send_json(&app, request("DELETE", "/api/tts/p1/1/ambas", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send_json(&app, request("DELETE", "/api/tts/p1/1/all", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"].as_array().unwrap().len(), 2);
    assert!(!dir.path().join("p1").join("1").exists());

    let (status, _) = send_json(&app, request("POST", "/api/tts/p1/42", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tts_batch_clears_status_when_done() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);
    create_and_import(&app).await;

    let (status, _) = send_json(&app, request("POST", "/api/tts/start/p1", None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // Rows disappear once the run has finished.
    for _ in 0..200 {
        let (_, rows) = send_json(&app, request("GET", "/api/tts/status_rows/p1", None)).await;
        if rows["rows"] == json!([]) && rows["table"].is_null() && dir.path().join("p1/2/r2.mp3").exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("TTS status table was never removed");
}

#[tokio::test]
async fn test_create_project_saves_initial_info() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);

    let (status, body) = send_json(
        &app,
        request(
            "POST",
            "/api/projects",
            Some(json!({
                "id": "rosa",
                "title": "Rosa en Soria",
                "desc": "Entrevista de 1998",
                "interviewee": {"voice": "coral"},
                "project_prompt": "Conserva los regionalismos."
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ok"], true);
    assert_eq!(body["project_id"], "rosa");
    assert_eq!(body["saved"]["title"], "Rosa en Soria");
    assert_eq!(body["saved"]["project_prompt"], "Conserva los regionalismos.");
    assert!(body["saved"].get("id").is_none());

    let (_, info) = send_json(&app, request("GET", "/api/projects/rosa/info", None)).await;
    assert_eq!(info["title"], "Rosa en Soria");
    assert_eq!(info["interviewee"]["voice"], "coral");

    let (status, body) = send_json(&app, request("POST", "/api/projects", None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["saved"]["title"], "");
}

#[tokio::test]
async fn test_invalid_run_options_are_rejected() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);
    create_and_import(&app).await;

    let (status, body) = send_json(
        &app,
        request(
            "POST",
            "/api/llm/process/p1/1",
            Some(json!({"part": "ambas", "overwrite_texts": false})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ambas"));

    let (status, _) = send_json(
        &app,
        request("POST", "/api/llm/start/p1", Some(json!({"overwrite_texts": "no"}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, request("POST", "/api/tts/p1/1", Some(json!({"part": 3})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing was touched and no run started.
    let (_, records) = send_json(&app, request("GET", "/api/records/p1", None)).await;
    assert_eq!(records[0]["pregunta"], "¿Cómo se llama?");
    assert_eq!(records[0]["entonacion_p"], "");
    let (_, rows) = send_json(&app, request("GET", "/api/llm/status_rows/p1", None)).await;
    assert!(rows["table"].is_null());
}

#[tokio::test]
async fn test_run_options_are_honored() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);
    create_and_import(&app).await;

    let (status, record) = send_json(
        &app,
        request(
            "POST",
            "/api/llm/process/p1/1",
            Some(json!({"overwrite_texts": false, "part": "Pregunta"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["pregunta"], "¿Cómo se llama?");
    assert_eq!(record["entonacion_p"], "amable");
    assert_eq!(record["entonacion_r"], "");
}

#[tokio::test]
async fn test_cross_origin_requests_are_allowed() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(&dir, None);

    let req = Request::builder()
        .method("GET")
        .uri("/api/projects")
        .header("origin", "http://localhost:5173")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );

    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/api/llm/start/p1")
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(preflight).await.unwrap();
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("access-control-allow-methods"));
}
