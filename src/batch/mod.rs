//! Background batch runs over a project's records.
//!
//! A run is started through [`BatchService`], which enumerates the records,
//! initializes the status table and then hands the loop to a detached tokio
//! task. Progress is only ever observed through the status table.

pub mod runner;
pub mod service;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::operation::OperationError;
use crate::project::ProjectError;
use crate::storage::StorageError;

pub use runner::{BatchReport, BatchRunner};
pub use service::{BatchHandle, BatchService};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("project error: {0}")]
    Project(#[from] ProjectError),

    #[error("a batch is already running for project {0}")]
    AlreadyRunning(String),

    #[error("record num={num} not found in project {project_id}")]
    RecordNotFound { project_id: String, num: i64 },

    #[error("operation failed: {0}")]
    Operation(OperationError),

    #[error("batch task failed: {0}")]
    TaskFailed(String),
}

impl BatchError {
    fn from_operation(project_id: &str, e: OperationError) -> Self {
        match e {
            OperationError::RecordNotFound(num) => BatchError::RecordNotFound {
                project_id: project_id.to_string(),
                num,
            },
            other => BatchError::Operation(other),
        }
    }
}

/// Projects with a run in flight. A slot is held by a [`RunGuard`] and
/// freed when the guard drops.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `project_id`, or `None` if a run already holds it.
    pub fn try_acquire(&self, project_id: &str) -> Option<RunGuard> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(project_id.to_string()) {
            return None;
        }
        Some(RunGuard {
            active: self.active.clone(),
            project_id: project_id.to_string(),
        })
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(project_id)
    }
}

#[derive(Debug)]
pub struct RunGuard {
    active: Arc<Mutex<HashSet<String>>>,
    project_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.project_id);
    }
}
