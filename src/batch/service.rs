use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::{BatchError, BatchReport, BatchRunner, RunGuard, RunRegistry};
use crate::backend::{LlmBackend, TtsBackend};
use crate::logger::ProjectLogger;
use crate::operation::{
    LlmCleanOperation, LlmOptions, OperationOutput, RecordOperation, TtsOptions,
    TtsSynthesizeOperation, VoiceDefaults,
};
use crate::project::{validate_project_id, ProjectError, ProjectStore};
use crate::status::{StatusSummary, StatusTracker};
use crate::storage::{Record, RecordStore, StatusRow, StatusStore, StatusTableInfo};

/// A started run. The status table already exists when this is returned.
#[derive(Debug)]
pub struct BatchHandle {
    pub project_id: String,
    pub total: usize,
    join: JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Wait for the background task. Callers normally drop the handle and
    /// poll the status table instead.
    pub async fn wait(self) -> Result<BatchReport, BatchError> {
        self.join
            .await
            .map_err(|e| BatchError::TaskFailed(e.to_string()))
    }
}

/// Control surface over batch runs and single-record operations.
#[derive(Clone)]
pub struct BatchService {
    records: Arc<dyn RecordStore>,
    tracker: StatusTracker,
    projects: ProjectStore,
    logger: ProjectLogger,
    llm: Arc<dyn LlmBackend>,
    tts: Arc<dyn TtsBackend>,
    voices: VoiceDefaults,
    runs: RunRegistry,
}

impl BatchService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        status: Arc<dyn StatusStore>,
        projects: ProjectStore,
        logger: ProjectLogger,
        llm: Arc<dyn LlmBackend>,
        tts: Arc<dyn TtsBackend>,
        voices: VoiceDefaults,
    ) -> Self {
        let tracker = StatusTracker::new(status, records.clone(), logger.clone());
        Self {
            records,
            tracker,
            projects,
            logger,
            llm,
            tts,
            voices,
            runs: RunRegistry::new(),
        }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn logger(&self) -> &ProjectLogger {
        &self.logger
    }

    fn runner(&self) -> BatchRunner {
        BatchRunner::new(
            self.records.clone(),
            self.tracker.clone(),
            self.projects.clone(),
            self.logger.clone(),
        )
    }

    fn llm_operation(&self, options: LlmOptions) -> LlmCleanOperation {
        LlmCleanOperation::new(self.llm.clone(), self.records.clone(), self.logger.clone(), options)
    }

    fn tts_operation(&self, options: TtsOptions) -> TtsSynthesizeOperation {
        TtsSynthesizeOperation::new(
            self.tts.clone(),
            self.projects.clone(),
            self.logger.clone(),
            self.voices.clone(),
            options,
        )
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.runs.is_running(project_id)
    }

    /// Hold the project's run slot for work that must not overlap a batch
    /// (import, deletion). Released when the guard drops.
    pub fn claim(&self, project_id: &str) -> Result<RunGuard, BatchError> {
        self.runs
            .try_acquire(project_id)
            .ok_or_else(|| BatchError::AlreadyRunning(project_id.to_string()))
    }

    pub async fn start_llm(&self, project_id: &str, options: LlmOptions) -> Result<BatchHandle, BatchError> {
        self.start(project_id, Arc::new(self.llm_operation(options))).await
    }

    pub async fn start_tts(&self, project_id: &str, options: TtsOptions) -> Result<BatchHandle, BatchError> {
        self.start(project_id, Arc::new(self.tts_operation(options))).await
    }

    /// Claim the project, initialize its status table, then run the loop on
    /// a detached task.
    pub async fn start(
        &self,
        project_id: &str,
        operation: Arc<dyn RecordOperation>,
    ) -> Result<BatchHandle, BatchError> {
        validate_project_id(project_id)?;
        let guard = self.claim(project_id)?;

        let runner = self.runner();
        let records = runner.prepare(project_id, operation.kind()).await?;
        let total = records.len();

        tracing::info!(project_id, kind = %operation.kind(), total, "Starting batch run");

        let task_project = project_id.to_string();
        let join = tokio::spawn(async move {
            let _guard = guard;
            runner.execute(&task_project, records, operation).await
        });

        Ok(BatchHandle {
            project_id: project_id.to_string(),
            total,
            join,
        })
    }

    pub async fn summary(&self, project_id: &str) -> StatusSummary {
        self.tracker.read_summary(project_id).await
    }

    pub async fn rows(&self, project_id: &str) -> Vec<StatusRow> {
        self.tracker.read_rows(project_id).await
    }

    pub async fn status_table(&self, project_id: &str) -> Option<StatusTableInfo> {
        self.tracker.table_info(project_id).await
    }

    async fn load_record(&self, project_id: &str, num: i64) -> Result<Record, BatchError> {
        self.records
            .get_record(project_id, num)
            .await?
            .ok_or_else(|| BatchError::RecordNotFound {
                project_id: project_id.to_string(),
                num,
            })
    }

    /// Clean and annotate a single record outside any batch.
    pub async fn process_llm_one(
        &self,
        project_id: &str,
        num: i64,
        options: LlmOptions,
    ) -> Result<Record, BatchError> {
        let record = self.load_record(project_id, num).await?;
        let info = self.projects.read_info(project_id).await;
        let output = self
            .llm_operation(options)
            .apply(project_id, &record, &info)
            .await
            .map_err(|e| BatchError::from_operation(project_id, e))?;

        match output {
            OperationOutput::Updated(record) => Ok(record),
            OperationOutput::Synthesized(_) => Ok(record),
        }
    }

    /// Synthesize audio for a single record outside any batch.
    pub async fn synthesize_one(
        &self,
        project_id: &str,
        num: i64,
        options: TtsOptions,
    ) -> Result<Vec<PathBuf>, BatchError> {
        let record = self.load_record(project_id, num).await?;
        let info = self.projects.read_info(project_id).await;
        let output = self
            .tts_operation(options)
            .apply(project_id, &record, &info)
            .await
            .map_err(|e| BatchError::from_operation(project_id, e))?;

        match output {
            OperationOutput::Synthesized(paths) => Ok(paths),
            OperationOutput::Updated(_) => Ok(Vec::new()),
        }
    }

    /// Remove the project's records, status and folder.
    pub async fn delete_project(&self, project_id: &str) -> Result<(), BatchError> {
        validate_project_id(project_id)?;
        let _guard = self.claim(project_id)?;
        let had_records = self.records.count_records(project_id).await? > 0;
        self.records.delete_project(project_id).await?;
        match self.projects.delete_project_dir(project_id).await {
            Err(ProjectError::NotFound(_)) if had_records => Ok(()),
            other => Ok(other?),
        }
    }
}
