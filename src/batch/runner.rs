use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::BatchError;
use crate::logger::ProjectLogger;
use crate::operation::{OperationKind, RecordOperation};
use crate::project::ProjectStore;
use crate::status::{StatusSummary, StatusTracker};
use crate::storage::{Record, RecordStore};

/// Outcome of one pass, as counted by the runner itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub kind: OperationKind,
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    /// Set when a persistence failure stopped the run early
    pub aborted: Option<String>,
    /// Whether the status table was deleted during cleanup
    pub status_removed: bool,
}

/// Applies a [`RecordOperation`] to every record of a project, one record at
/// a time, tracking each result in the project's status table.
#[derive(Clone)]
pub struct BatchRunner {
    records: Arc<dyn RecordStore>,
    tracker: StatusTracker,
    projects: ProjectStore,
    logger: ProjectLogger,
}

impl BatchRunner {
    pub fn new(
        records: Arc<dyn RecordStore>,
        tracker: StatusTracker,
        projects: ProjectStore,
        logger: ProjectLogger,
    ) -> Self {
        Self {
            records,
            tracker,
            projects,
            logger,
        }
    }

    /// Enumerate the project's records and create a fresh status table for
    /// them. Runs before any background work so pollers never see a missing
    /// table while a run is active. Errors here are returned to the caller.
    pub async fn prepare(&self, project_id: &str, kind: OperationKind) -> Result<Vec<Record>, BatchError> {
        let records = match self.records.list_records(project_id).await {
            Ok(records) => records,
            Err(e) => {
                self.logger
                    .error(project_id, format!("{} batch: cannot list records: {}", kind, e))
                    .await;
                return Err(e.into());
            }
        };

        let nums: Vec<i64> = records.iter().map(|r| r.num).collect();
        if let Err(e) = self.tracker.init(project_id, kind.as_str(), &nums).await {
            self.logger
                .error(project_id, format!("{} batch: cannot initialize status: {}", kind, e))
                .await;
            return Err(e.into());
        }

        Ok(records)
    }

    /// Process `records` sequentially in the given order. Record-level
    /// failures are recorded and skipped; a persistence failure stops the
    /// loop. Cleanup always runs.
    pub async fn execute(
        &self,
        project_id: &str,
        records: Vec<Record>,
        operation: Arc<dyn RecordOperation>,
    ) -> BatchReport {
        let kind = operation.kind();
        let mut report = BatchReport {
            kind,
            total: records.len(),
            processed: 0,
            failed: 0,
            aborted: None,
            status_removed: false,
        };

        self.logger
            .info(
                project_id,
                format!("{} batch started: {} records", kind, records.len()),
            )
            .await;

        let info = self.projects.read_info(project_id).await;

        for record in &records {
            let marked = match operation.apply(project_id, record, &info).await {
                Ok(_) => {
                    report.processed += 1;
                    self.tracker.mark_processed(project_id, record.num).await
                }
                Err(e) if e.is_fatal() => {
                    report.aborted = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    self.tracker
                        .mark_failed(project_id, record.num, &e.to_string())
                        .await
                }
            };

            if let Err(e) = marked {
                report.aborted = Some(e.to_string());
                break;
            }
        }

        if let Some(reason) = &report.aborted {
            self.logger
                .error(project_id, format!("{} batch aborted: {}", kind, reason))
                .await;
        }

        report.status_removed = self.cleanup(project_id, operation.as_ref()).await;

        self.logger
            .info(
                project_id,
                format!(
                    "{} batch finished: processed={} failed={} total={}",
                    kind, report.processed, report.failed, report.total
                ),
            )
            .await;

        report
    }

    /// Read the final summary once and drop the table when the operation
    /// does not retain it and every row is terminal. An unreadable summary
    /// keeps the table.
    async fn cleanup(&self, project_id: &str, operation: &dyn RecordOperation) -> bool {
        let summary: StatusSummary = match self.tracker.try_summary(project_id).await {
            Ok(summary) => summary,
            Err(e) => {
                self.logger
                    .error(
                        project_id,
                        format!("cannot read final status, keeping table: {}", e),
                    )
                    .await;
                return false;
            }
        };
        tracing::debug!(
            project_id,
            kind = %operation.kind(),
            processed = summary.processed,
            failed = summary.failed,
            total = summary.total,
            "Batch final summary"
        );

        if operation.retain_status_on_completion() || !summary.is_complete() {
            return false;
        }

        match self.tracker.remove(project_id).await {
            Ok(()) => true,
            Err(e) => {
                self.logger
                    .error(project_id, format!("cannot remove status table: {}", e))
                    .await;
                false
            }
        }
    }
}
