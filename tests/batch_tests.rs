//! Batch runs end to end: DuckDB in memory, scripted LLM/TTS backends,
//! project folders in a temp dir.

use async_trait::async_trait;
use interview_tts::backend::{
    BackendError, LlmBackend, LlmOutput, LlmRequest, SpeechRequest, TtsBackend,
};
use interview_tts::batch::{BatchError, BatchService};
use interview_tts::logger::ProjectLogger;
use interview_tts::operation::llm::DEFAULT_ANNOTATION_ANSWER;
use interview_tts::operation::{LlmOptions, TtsOptions, VoiceDefaults};
use interview_tts::project::{ProjectStore, Side};
use interview_tts::status::StatusSummary;
use interview_tts::storage::duckdb::DuckDbStorage;
use interview_tts::storage::{
    Record, RecordStore, RecordUpdate, StatusRow, StatusStore, StatusTableInfo, StorageError,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

const PROJECT: &str = "entrevista";

/// Fails every request whose question is listed in `fail_on`.
#[derive(Default)]
struct ScriptedLlm {
    fail_on: Vec<String>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmOutput, BackendError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.pregunta.clone());
        if self.fail_on.contains(&request.pregunta) {
            return Err(BackendError::Status {
                status: 500,
                message: format!("upstream exploded on '{}'", request.pregunta),
            });
        }
        Ok(LlmOutput {
            pregunta_limpia: Some(format!("{} (limpia)", request.pregunta)),
            respuesta_limpia: Some(format!("{} (limpia)", request.respuesta)),
            entonacion_p: Some("curioso".to_string()),
            entonacion_r: None,
        })
    }
}

/// Writes a stub mp3; fails for texts listed in `fail_on`.
#[derive(Default)]
struct FakeTts {
    fail_on: Vec<String>,
    voices: Mutex<Vec<String>>,
}

#[async_trait]
impl TtsBackend for FakeTts {
    async fn synthesize(&self, request: &SpeechRequest, out_path: &Path) -> Result<PathBuf, BackendError> {
        if self.fail_on.contains(&request.text) {
            return Err(BackendError::MalformedResponse("empty audio stream".to_string()));
        }
        self.voices.lock().unwrap().push(request.voice.clone());
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(out_path, b"ID3").await?;
        Ok(out_path.to_path_buf())
    }
}

/// Record store whose writes always fail.
struct ReadOnlyRecords(Arc<DuckDbStorage>);

#[async_trait]
impl RecordStore for ReadOnlyRecords {
    async fn list_records(&self, project_id: &str) -> Result<Vec<Record>, StorageError> {
        self.0.list_records(project_id).await
    }

    async fn get_record(&self, project_id: &str, num: i64) -> Result<Option<Record>, StorageError> {
        self.0.get_record(project_id, num).await
    }

    async fn update_record(
        &self,
        _project_id: &str,
        _num: i64,
        _update: &RecordUpdate,
    ) -> Result<Record, StorageError> {
        Err(StorageError::Database("disk full".to_string()))
    }

    async fn replace_records(&self, project_id: &str, records: &[Record]) -> Result<(), StorageError> {
        self.0.replace_records(project_id, records).await
    }

    async fn count_records(&self, project_id: &str) -> Result<usize, StorageError> {
        self.0.count_records(project_id).await
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), StorageError> {
        self.0.delete_project(project_id).await
    }
}

/// Status store whose reads fail; writes go through.
struct UnreadableStatus(Arc<DuckDbStorage>);

#[async_trait]
impl StatusStore for UnreadableStatus {
    async fn create_table(
        &self,
        project_id: &str,
        operation: &str,
        rows: &[StatusRow],
    ) -> Result<(), StorageError> {
        self.0.create_table(project_id, operation, rows).await
    }

    async fn table_info(&self, project_id: &str) -> Result<Option<StatusTableInfo>, StorageError> {
        self.0.table_info(project_id).await
    }

    async fn upsert_row(&self, project_id: &str, row: &StatusRow) -> Result<bool, StorageError> {
        self.0.upsert_row(project_id, row).await
    }

    async fn read_rows(&self, _project_id: &str) -> Result<Option<Vec<StatusRow>>, StorageError> {
        Err(StorageError::Database("io error reading status".to_string()))
    }

    async fn delete_table(&self, project_id: &str) -> Result<bool, StorageError> {
        self.0.delete_table(project_id).await
    }
}

struct Harness {
    service: BatchService,
    storage: Arc<DuckDbStorage>,
    projects: ProjectStore,
    _dir: TempDir,
}

async fn harness_with(
    llm: Arc<dyn LlmBackend>,
    tts: Arc<dyn TtsBackend>,
    records_override: Option<Arc<dyn RecordStore>>,
) -> Harness {
    harness_with_stores(llm, tts, records_override, None).await
}

async fn harness_with_stores(
    llm: Arc<dyn LlmBackend>,
    tts: Arc<dyn TtsBackend>,
    records_override: Option<Arc<dyn RecordStore>>,
    status_override: Option<Arc<dyn StatusStore>>,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
    let records: Vec<Record> = (1..=3)
        .map(|n| Record::new(n, format!("q{}", n), format!("a{}", n)))
        .collect();
    storage.replace_records(PROJECT, &records).await.unwrap();

    let logger = ProjectLogger::new(dir.path());
    let projects = ProjectStore::new(dir.path(), logger.clone());
    projects.create_project(Some(PROJECT)).await.unwrap();

    let record_store: Arc<dyn RecordStore> = records_override.unwrap_or_else(|| storage.clone() as Arc<dyn RecordStore>);
    let status_store: Arc<dyn StatusStore> =
        status_override.unwrap_or_else(|| storage.clone() as Arc<dyn StatusStore>);
    let service = BatchService::new(
        record_store,
        status_store,
        projects.clone(),
        logger,
        llm,
        tts,
        VoiceDefaults {
            question: "onyx".to_string(),
            answer: "sage".to_string(),
        },
    );

    Harness {
        service,
        storage,
        projects,
        _dir: dir,
    }
}

async fn harness(llm: ScriptedLlm, tts: FakeTts) -> Harness {
    harness_with(Arc::new(llm), Arc::new(tts), None).await
}

#[tokio::test]
async fn test_llm_run_isolates_record_failure() {
    let llm = ScriptedLlm {
        fail_on: vec!["q2".to_string()],
        ..Default::default()
    };
    let h = harness(llm, FakeTts::default()).await;

    let handle = h.service.start_llm(PROJECT, LlmOptions::default()).await.unwrap();
    assert_eq!(handle.total, 3);
    let report = handle.wait().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert!(report.aborted.is_none());
    assert!(!report.status_removed);

    let rows = h.service.rows(PROJECT).await;
    assert_eq!(rows.len(), 3);
    assert!(rows[0].processed && !rows[0].failed);
    assert!(rows[1].failed && !rows[1].processed);
    assert!(rows[1].error.contains("upstream exploded on 'q2'"));
    assert!(rows[2].processed && !rows[2].failed);

    assert_eq!(
        h.service.summary(PROJECT).await,
        StatusSummary {
            processed: 2,
            failed: 1,
            total: 3
        }
    );

    let stored = h.storage.list_records(PROJECT).await.unwrap();
    assert_eq!(stored[0].pregunta, "q1 (limpia)");
    assert_eq!(stored[0].entonacion_p, "curioso");
    assert_eq!(stored[0].entonacion_r, DEFAULT_ANNOTATION_ANSWER);
    assert_eq!(stored[1].pregunta, "q2");
    assert_eq!(stored[1].entonacion_p, "");
}

#[tokio::test]
async fn test_llm_run_retains_status_after_success() {
    let h = harness(ScriptedLlm::default(), FakeTts::default()).await;

    h.service
        .start_llm(PROJECT, LlmOptions::default())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let expected = StatusSummary {
        processed: 3,
        failed: 0,
        total: 3,
    };
    assert_eq!(h.service.summary(PROJECT).await, expected);
    // Still there on a later poll
    assert_eq!(h.service.summary(PROJECT).await, expected);
    assert_eq!(h.service.rows(PROJECT).await.len(), 3);
}

#[tokio::test]
async fn test_tts_run_removes_status_after_completion() {
    let h = harness(ScriptedLlm::default(), FakeTts::default()).await;

    let report = h
        .service
        .start_tts(PROJECT, TtsOptions::default())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.processed, 3);
    assert!(report.status_removed);

    // No table left: rows are empty and the summary reports no progress.
    assert!(h.service.rows(PROJECT).await.is_empty());
    assert_eq!(
        h.service.summary(PROJECT).await,
        StatusSummary {
            processed: 0,
            failed: 0,
            total: 3
        }
    );
    assert!(h.storage.table_info(PROJECT).await.unwrap().is_none());

    for num in 1..=3 {
        assert!(h.projects.audio_path(PROJECT, num, Side::Pregunta).exists());
        assert!(h.projects.audio_path(PROJECT, num, Side::Respuesta).exists());
    }
}

#[tokio::test]
async fn test_tts_run_with_failures_still_removes_status() {
    let tts = FakeTts {
        fail_on: vec!["a3".to_string()],
        ..Default::default()
    };
    let h = harness(ScriptedLlm::default(), tts).await;

    let report = h
        .service
        .start_tts(PROJECT, TtsOptions::default())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert!(report.status_removed);
    assert!(h.service.rows(PROJECT).await.is_empty());
}

#[tokio::test]
async fn test_tts_voice_override_applies_to_both_sides() {
    let tts = Arc::new(FakeTts::default());
    let h = harness_with(Arc::new(ScriptedLlm::default()), tts.clone(), None).await;
    h.projects
        .write_info(PROJECT, &serde_json::json!({"interviewee": {"voice": "coral"}}))
        .await
        .unwrap();

    h.service
        .synthesize_one(PROJECT, 1, TtsOptions::default())
        .await
        .unwrap();
    let files = h
        .service
        .synthesize_one(
            PROJECT,
            2,
            TtsOptions {
                voice_override: Some("ash".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(files.len(), 2);

    let voices = tts.voices.lock().unwrap().clone();
    assert_eq!(voices, vec!["onyx", "coral", "ash", "ash"]);
}

#[tokio::test]
async fn test_status_exists_before_start_returns_and_second_start_is_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let llm = Arc::new(ScriptedLlm {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let h = harness_with(llm.clone(), Arc::new(FakeTts::default()), None).await;

    let handle = h.service.start_llm(PROJECT, LlmOptions::default()).await.unwrap();

    let rows = h.service.rows(PROJECT).await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| !r.processed && !r.failed));
    assert!(h.service.is_running(PROJECT));

    let second = h.service.start_tts(PROJECT, TtsOptions::default()).await;
    assert!(matches!(second, Err(BatchError::AlreadyRunning(_))));

    gate.add_permits(3);
    handle.wait().await.unwrap();
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    assert!(!h.service.is_running(PROJECT));

    gate.add_permits(3);
    let again = h.service.start_llm(PROJECT, LlmOptions::default()).await.unwrap();
    again.wait().await.unwrap();
}

#[tokio::test]
async fn test_persistence_failure_aborts_run() {
    let inner = Arc::new(DuckDbStorage::in_memory().unwrap());
    let h = harness_with(
        Arc::new(ScriptedLlm::default()),
        Arc::new(FakeTts::default()),
        Some(Arc::new(ReadOnlyRecords(inner.clone()))),
    )
    .await;
    let records = h.storage.list_records(PROJECT).await.unwrap();
    inner.replace_records(PROJECT, &records).await.unwrap();

    let report = h
        .service
        .start_llm(PROJECT, LlmOptions::default())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(report.aborted.as_deref().unwrap_or_default().contains("disk full"));
    assert_eq!(report.processed, 0);
    assert_eq!(report.failed, 0);

    let summary = h.service.summary(PROJECT).await;
    assert_eq!(summary, StatusSummary { processed: 0, failed: 0, total: 3 });
}

#[tokio::test]
async fn test_single_record_operations() {
    let h = harness(ScriptedLlm::default(), FakeTts::default()).await;

    let updated = h
        .service
        .process_llm_one(
            PROJECT,
            2,
            LlmOptions {
                part: "respuesta".parse().unwrap(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.pregunta, "q2");
    assert_eq!(updated.respuesta, "a2 (limpia)");
    assert_eq!(updated.entonacion_p, "");

    let missing = h.service.process_llm_one(PROJECT, 99, LlmOptions::default()).await;
    assert!(matches!(missing, Err(BatchError::RecordNotFound { num: 99, .. })));

    // Single-record work never creates a status table.
    assert!(h.storage.table_info(PROJECT).await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_project_run_completes() {
    let h = harness(ScriptedLlm::default(), FakeTts::default()).await;
    h.storage.replace_records(PROJECT, &[]).await.unwrap();

    let report = h
        .service
        .start_tts(PROJECT, TtsOptions::default())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.total, 0);
    assert!(report.status_removed);
    assert_eq!(h.service.summary(PROJECT).await, StatusSummary::default());
}

#[tokio::test]
async fn test_unreadable_final_status_keeps_tts_table() {
    let status = Arc::new(DuckDbStorage::in_memory().unwrap());
    let h = harness_with_stores(
        Arc::new(ScriptedLlm::default()),
        Arc::new(FakeTts::default()),
        None,
        Some(Arc::new(UnreadableStatus(status.clone()))),
    )
    .await;

    let report = h
        .service
        .start_tts(PROJECT, TtsOptions::default())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.processed, 3);
    assert!(!report.status_removed);
    assert_eq!(status.table_info(PROJECT).await.unwrap().unwrap().operation, "tts");
    assert_eq!(status.read_rows(PROJECT).await.unwrap().unwrap().len(), 3);
}

#[tokio::test]
async fn test_claimed_project_cannot_be_started_or_deleted() {
    let h = harness(ScriptedLlm::default(), FakeTts::default()).await;

    let guard = h.service.claim(PROJECT).unwrap();
    assert!(h.service.is_running(PROJECT));
    assert!(matches!(
        h.service.start_llm(PROJECT, LlmOptions::default()).await,
        Err(BatchError::AlreadyRunning(_))
    ));
    assert!(matches!(
        h.service.delete_project(PROJECT).await,
        Err(BatchError::AlreadyRunning(_))
    ));
    assert_eq!(h.storage.count_records(PROJECT).await.unwrap(), 3);

    drop(guard);
    h.service.delete_project(PROJECT).await.unwrap();
    assert_eq!(h.storage.count_records(PROJECT).await.unwrap(), 0);
    assert!(!h.service.is_running(PROJECT));
}

#[tokio::test]
async fn test_progress_is_monotonic_and_in_record_order() {
    let gate = Arc::new(Semaphore::new(0));
    let llm = Arc::new(ScriptedLlm {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let h = harness_with(llm.clone(), Arc::new(FakeTts::default()), None).await;
    let shuffled: Vec<Record> = [3, 1, 2]
        .into_iter()
        .map(|n| Record::new(n, format!("q{}", n), format!("a{}", n)))
        .collect();
    h.storage.replace_records(PROJECT, &shuffled).await.unwrap();

    let handle = h.service.start_llm(PROJECT, LlmOptions::default()).await.unwrap();

    let mut last = h.service.summary(PROJECT).await;
    assert_eq!(last, StatusSummary { processed: 0, failed: 0, total: 3 });

    for step in 1..=3 {
        gate.add_permits(1);
        let mut reached = false;
        for _ in 0..500 {
            let now = h.service.summary(PROJECT).await;
            assert!(now.processed >= last.processed, "processed went from {:?} to {:?}", last, now);
            assert!(now.failed >= last.failed);
            assert_eq!(now.total, 3);
            last = now;
            if now.processed == step {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(reached, "run never reached {} processed records", step);

        let rows = h.service.rows(PROJECT).await;
        let done: Vec<i64> = rows.iter().filter(|r| r.processed).map(|r| r.num).collect();
        assert_eq!(done, (1..=step as i64).collect::<Vec<_>>());
    }

    handle.wait().await.unwrap();
    assert_eq!(*llm.seen.lock().unwrap(), vec!["q1", "q2", "q3"]);
}
