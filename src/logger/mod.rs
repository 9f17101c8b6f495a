//! Per-project append-only log.
//!
//! Each project gets a `.log` directory inside its data folder with one file
//! per UTC calendar day (`YYYY-MM-DD.log`). Lines look like
//! `2026-10-16T09:30:00Z [INFO] message`.
//!
//! Writers for the same project are serialized by a mutex taken from
//! [`LockRegistry`], so lines are never interleaved. Every line is mirrored
//! to `tracing` at the matching level.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

pub const LOG_DIR_NAME: &str = ".log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        };
        f.write_str(s)
    }
}

/// Process-lifetime map of project id to write mutex.
///
/// The outer lock is held only for get-or-create; appends hold the
/// per-project mutex.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    pub fn get(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct ProjectLogger {
    data_dir: PathBuf,
    locks: Arc<LockRegistry>,
}

impl ProjectLogger {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            locks: Arc::new(LockRegistry::default()),
        }
    }

    pub fn log_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join(project_id).join(LOG_DIR_NAME)
    }

    pub fn segment_path(&self, project_id: &str, date: NaiveDate) -> PathBuf {
        self.log_dir(project_id)
            .join(format!("{}.log", date.format("%Y-%m-%d")))
    }

    pub async fn info(&self, project_id: &str, message: impl AsRef<str>) {
        self.log(project_id, message, LogLevel::Info).await
    }

    pub async fn error(&self, project_id: &str, message: impl AsRef<str>) {
        self.log(project_id, message, LogLevel::Error).await
    }

    pub async fn debug(&self, project_id: &str, message: impl AsRef<str>) {
        self.log(project_id, message, LogLevel::Debug).await
    }

    /// Append a line to today's segment. Failures are reported through
    /// `tracing` only; the project log is never a reason to fail a caller.
    pub async fn log(&self, project_id: &str, message: impl AsRef<str>, level: LogLevel) {
        let message = message.as_ref();
        match level {
            LogLevel::Info => tracing::info!(project_id, "{}", message),
            LogLevel::Error => tracing::error!(project_id, "{}", message),
            LogLevel::Debug => tracing::debug!(project_id, "{}", message),
        }

        if let Err(e) = self.append(project_id, message, level).await {
            tracing::warn!(project_id, error = %e, "Failed to write project log line");
        }
    }

    async fn append(&self, project_id: &str, message: &str, level: LogLevel) -> std::io::Result<()> {
        let now = Utc::now();
        let line = format!("{} [{}] {}\n", now.format("%Y-%m-%dT%H:%M:%SZ"), level, message);
        let path = self.segment_path(project_id, now.date_naive());

        let lock = self.locks.get(project_id);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Full text of one day's segment (today if `date` is None).
    /// Empty when the segment does not exist or cannot be read.
    pub async fn read(&self, project_id: &str, date: Option<NaiveDate>) -> String {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let path = self.segment_path(project_id, date);
        read_or_empty(&path).await
    }

    /// Sorted segment file names for the project.
    pub async fn list_files(&self, project_id: &str) -> Vec<String> {
        let mut files = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(self.log_dir(project_id)).await else {
            return files;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_log = path.extension().map(|ext| ext == "log").unwrap_or(false);
            if is_log && path.is_file() {
                if let Some(name) = path.file_name() {
                    files.push(name.to_string_lossy().into_owned());
                }
            }
        }

        files.sort();
        files
    }

    pub fn lock_registry(&self) -> &LockRegistry {
        &self.locks
    }
}

async fn read_or_empty(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read project log");
            String::new()
        }
    }
}
