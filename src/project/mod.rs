pub mod info;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::logger::{ProjectLogger, LOG_DIR_NAME};

pub use info::{merge_info, normalize_update, ProjectInfo, RoleConfig};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project {0} not found")]
    NotFound(String),

    #[error("invalid project id '{0}'")]
    InvalidId(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: String,
    pub title: String,
    pub desc: String,
}

/// Question or answer side of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Pregunta,
    Respuesta,
}

impl Side {
    /// Audio file name for this side of record `num`: `p<num>.mp3` / `r<num>.mp3`.
    pub fn audio_file_name(self, num: i64) -> String {
        match self {
            Side::Pregunta => format!("p{}.mp3", num),
            Side::Respuesta => format!("r{}.mp3", num),
        }
    }
}

/// Project folders on disk: `<data_dir>/<project>/` holds the `.info` file,
/// the `.log` directory and one folder per record with its audio.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    data_dir: PathBuf,
    logger: ProjectLogger,
}

/// Project ids become directory names, so only plain names are accepted.
pub fn validate_project_id(project_id: &str) -> Result<(), ProjectError> {
    let valid = !project_id.is_empty()
        && project_id != "."
        && project_id != ".."
        && project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ProjectError::InvalidId(project_id.to_string()))
    }
}

impl ProjectStore {
    pub fn new(data_dir: impl Into<PathBuf>, logger: ProjectLogger) -> Self {
        Self {
            data_dir: data_dir.into(),
            logger,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join(project_id)
    }

    pub fn info_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(format!("{}.info", project_id))
    }

    pub fn record_audio_dir(&self, project_id: &str, num: i64) -> PathBuf {
        self.project_dir(project_id).join(num.to_string())
    }

    pub fn audio_path(&self, project_id: &str, num: i64, side: Side) -> PathBuf {
        self.record_audio_dir(project_id, num).join(side.audio_file_name(num))
    }

    /// Raw JSON of the `.info` file, `{}` when missing or unreadable.
    pub async fn read_raw(&self, project_id: &str) -> Value {
        let path = self.info_path(project_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Value::Object(Default::default());
            }
            Err(e) => {
                self.logger
                    .error(project_id, format!("read_raw: cannot read {}: {}", path.display(), e))
                    .await;
                return Value::Object(Default::default());
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => Value::Object(Default::default()),
            Err(e) => {
                self.logger
                    .error(project_id, format!("read_raw: invalid json in {}: {}", path.display(), e))
                    .await;
                Value::Object(Default::default())
            }
        }
    }

    /// Normalized project configuration; defaults when no `.info` exists.
    pub async fn read_info(&self, project_id: &str) -> ProjectInfo {
        let raw = self.read_raw(project_id).await;
        let info = ProjectInfo::from_raw(&raw);
        self.logger
            .debug(
                project_id,
                format!(
                    "read_info: interviewer={:?} interviewee={:?}",
                    info.interviewer, info.interviewee
                ),
            )
            .await;
        info
    }

    /// Merge `body` into the stored `.info` and return what was saved.
    /// The file is replaced atomically through a temporary sibling.
    pub async fn write_info(&self, project_id: &str, body: &Value) -> Result<Value, ProjectError> {
        validate_project_id(project_id)?;
        let existing = self.read_raw(project_id).await;
        let current = ProjectInfo::from_raw(&existing);
        let updates = normalize_update(&current, body);
        let merged = merge_info(&existing, &updates);

        let path = self.info_path(project_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&merged)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        self.logger.info(project_id, "project info updated").await;
        Ok(merged)
    }

    /// Create a project folder with a minimal `.info`, generating an id when
    /// none is given. An existing `.info` is left untouched.
    pub async fn create_project(&self, project_id: Option<&str>) -> Result<String, ProjectError> {
        let project_id = match project_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        validate_project_id(&project_id)?;

        tokio::fs::create_dir_all(self.project_dir(&project_id)).await?;
        let info_path = self.info_path(&project_id);
        if !tokio::fs::try_exists(&info_path).await? {
            let initial = serde_json::json!({"title": "", "desc": ""});
            tokio::fs::write(&info_path, serde_json::to_vec_pretty(&initial)?).await?;
        }

        self.logger
            .info(&project_id, "create_project: ensured project dir and .info file")
            .await;
        Ok(project_id)
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>, ProjectError> {
        let mut projects = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(projects),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            if id == LOG_DIR_NAME || validate_project_id(&id).is_err() {
                continue;
            }
            let info = ProjectInfo::from_raw(&self.read_raw(&id).await);
            projects.push(ProjectSummary {
                title: if info.title.is_empty() { id.clone() } else { info.title },
                desc: info.description,
                id,
            });
        }

        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    /// Remove the project's folder (audio, logs, `.info`).
    pub async fn delete_project_dir(&self, project_id: &str) -> Result<(), ProjectError> {
        validate_project_id(project_id)?;
        let dir = self.project_dir(project_id);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(ProjectError::NotFound(project_id.to_string()));
        }
        tokio::fs::remove_dir_all(&dir).await?;
        tracing::info!(project_id, "Deleted project directory");
        Ok(())
    }

    /// Delete the audio of one or both sides of a record, then the record's
    /// folder if it is left empty. Returns the removed files.
    pub async fn delete_audio(&self, project_id: &str, num: i64, sides: &[Side]) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for side in sides {
            let path = self.audio_path(project_id, num, *side);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    self.logger
                        .info(project_id, format!("delete_audio: removed {}", path.display()))
                        .await;
                    removed.push(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    self.logger
                        .error(
                            project_id,
                            format!("delete_audio: cannot remove {}: {}", path.display(), e),
                        )
                        .await;
                }
            }
        }

        let dir = self.record_audio_dir(project_id, num);
        if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
            if matches!(entries.next_entry().await, Ok(None)) {
                match tokio::fs::remove_dir(&dir).await {
                    Ok(()) => {
                        self.logger
                            .info(project_id, format!("delete_audio: removed dir {}", dir.display()))
                            .await
                    }
                    Err(e) => {
                        self.logger
                            .error(
                                project_id,
                                format!("delete_audio: cannot remove dir {}: {}", dir.display(), e),
                            )
                            .await
                    }
                }
            }
        }

        removed
    }
}
