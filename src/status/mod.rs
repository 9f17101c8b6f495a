use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::logger::ProjectLogger;
use crate::storage::{RecordStore, StatusRow, StatusStore, StatusTableInfo, StorageError};

/// Longest error text kept on a failed row, in characters.
pub const MAX_ERROR_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
}

impl StatusSummary {
    pub fn from_rows(rows: &[StatusRow]) -> Self {
        Self {
            processed: rows.iter().filter(|r| r.processed).count(),
            failed: rows.iter().filter(|r| r.failed).count(),
            total: rows.len(),
        }
    }

    /// Every row has reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.processed + self.failed >= self.total
    }
}

pub fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_CHARS).collect()
}

/// Per-project batch progress table.
///
/// `mark_*` never fail because the table or row is missing (that case is
/// logged and ignored); they only fail when the backing store cannot be
/// written, which callers treat as fatal for the run.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn StatusStore>,
    records: Arc<dyn RecordStore>,
    logger: ProjectLogger,
}

impl StatusTracker {
    pub fn new(
        store: Arc<dyn StatusStore>,
        records: Arc<dyn RecordStore>,
        logger: ProjectLogger,
    ) -> Self {
        Self {
            store,
            records,
            logger,
        }
    }

    /// Create a fresh table with one pending row per record number,
    /// replacing whatever table the project had.
    pub async fn init(
        &self,
        project_id: &str,
        operation: &str,
        record_nums: &[i64],
    ) -> Result<Vec<StatusRow>, StorageError> {
        let rows: Vec<StatusRow> = record_nums.iter().copied().map(StatusRow::pending).collect();
        self.store.create_table(project_id, operation, &rows).await?;
        self.logger
            .info(
                project_id,
                format!("status table initialized for {} with {} rows", operation, rows.len()),
            )
            .await;
        Ok(rows)
    }

    pub async fn mark_processed(&self, project_id: &str, num: i64) -> Result<(), StorageError> {
        let row = StatusRow {
            num,
            processed: true,
            failed: false,
            error: String::new(),
        };
        if self.store.upsert_row(project_id, &row).await? {
            self.logger
                .info(project_id, format!("status: marked num={} processed", num))
                .await;
        } else {
            self.logger
                .info(
                    project_id,
                    format!("status: no table or row for num={}, processed mark ignored", num),
                )
                .await;
        }
        Ok(())
    }

    pub async fn mark_failed(&self, project_id: &str, num: i64, error: &str) -> Result<(), StorageError> {
        let row = StatusRow {
            num,
            processed: false,
            failed: true,
            error: truncate_error(error),
        };
        if self.store.upsert_row(project_id, &row).await? {
            let preview: String = error.chars().take(200).collect();
            self.logger
                .error(
                    project_id,
                    format!("status: marked num={} failed error={}", num, preview),
                )
                .await;
        } else {
            self.logger
                .info(
                    project_id,
                    format!("status: no table or row for num={}, failed mark ignored", num),
                )
                .await;
        }
        Ok(())
    }

    /// Aggregate progress. Without a table, reports zero progress over the
    /// project's current record count. Never fails: storage errors are
    /// logged and reported as an empty summary.
    pub async fn read_summary(&self, project_id: &str) -> StatusSummary {
        match self.try_summary(project_id).await {
            Ok(summary) => summary,
            Err(e) => {
                self.logger
                    .error(project_id, format!("status: cannot read status table: {}", e))
                    .await;
                StatusSummary::default()
            }
        }
    }

    /// Like [`read_summary`](Self::read_summary), but storage errors are
    /// returned instead of reported as an empty summary.
    pub async fn try_summary(&self, project_id: &str) -> Result<StatusSummary, StorageError> {
        match self.store.read_rows(project_id).await? {
            Some(rows) => Ok(StatusSummary::from_rows(&rows)),
            None => Ok(StatusSummary {
                processed: 0,
                failed: 0,
                total: self.records.count_records(project_id).await?,
            }),
        }
    }

    /// Operation and start time of the current table, if any.
    pub async fn table_info(&self, project_id: &str) -> Option<StatusTableInfo> {
        match self.store.table_info(project_id).await {
            Ok(info) => info,
            Err(e) => {
                self.logger
                    .error(project_id, format!("status: cannot read status table info: {}", e))
                    .await;
                None
            }
        }
    }

    /// Rows in record order; empty when no table exists.
    pub async fn read_rows(&self, project_id: &str) -> Vec<StatusRow> {
        match self.store.read_rows(project_id).await {
            Ok(rows) => rows.unwrap_or_default(),
            Err(e) => {
                self.logger
                    .error(project_id, format!("status: cannot read status rows: {}", e))
                    .await;
                Vec::new()
            }
        }
    }

    pub async fn remove(&self, project_id: &str) -> Result<(), StorageError> {
        if self.store.delete_table(project_id).await? {
            self.logger.info(project_id, "status table removed").await;
        }
        Ok(())
    }
}
