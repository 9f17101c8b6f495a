use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One question/answer pair of a project's transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub num: i64,
    pub pregunta: String,
    pub respuesta: String,
    #[serde(default)]
    pub entonacion_p: String,
    #[serde(default)]
    pub entonacion_r: String,
    #[serde(default)]
    pub notas: String,
}

impl Record {
    pub fn new(num: i64, pregunta: impl Into<String>, respuesta: impl Into<String>) -> Self {
        Self {
            num,
            pregunta: pregunta.into(),
            respuesta: respuesta.into(),
            entonacion_p: String::new(),
            entonacion_r: String::new(),
            notas: String::new(),
        }
    }
}

/// Partial update of a record; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub pregunta: Option<String>,
    pub respuesta: Option<String>,
    pub entonacion_p: Option<String>,
    pub entonacion_r: Option<String>,
    pub notas: Option<String>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.pregunta.is_none()
            && self.respuesta.is_none()
            && self.entonacion_p.is_none()
            && self.entonacion_r.is_none()
            && self.notas.is_none()
    }

    pub fn apply_to(&self, record: &mut Record) {
        if let Some(v) = &self.pregunta {
            record.pregunta = v.clone();
        }
        if let Some(v) = &self.respuesta {
            record.respuesta = v.clone();
        }
        if let Some(v) = &self.entonacion_p {
            record.entonacion_p = v.clone();
        }
        if let Some(v) = &self.entonacion_r {
            record.entonacion_r = v.clone();
        }
        if let Some(v) = &self.notas {
            record.notas = v.clone();
        }
    }
}

/// Progress of one record within a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub num: i64,
    pub processed: bool,
    pub failed: bool,
    pub error: String,
}

impl StatusRow {
    pub fn pending(num: i64) -> Self {
        Self {
            num,
            processed: false,
            failed: false,
            error: String::new(),
        }
    }
}

/// Marker for an existing status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTableInfo {
    pub operation: String,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records of a project in ascending `num` order.
    async fn list_records(&self, project_id: &str) -> Result<Vec<Record>, StorageError>;

    async fn get_record(&self, project_id: &str, num: i64) -> Result<Option<Record>, StorageError>;

    /// Applies `update` and returns the stored record.
    /// Fails with `StorageError::RecordNotFound` if `num` is absent.
    async fn update_record(
        &self,
        project_id: &str,
        num: i64,
        update: &RecordUpdate,
    ) -> Result<Record, StorageError>;

    /// Replaces every record of the project.
    async fn replace_records(&self, project_id: &str, records: &[Record]) -> Result<(), StorageError>;

    async fn count_records(&self, project_id: &str) -> Result<usize, StorageError>;

    /// Removes records and status rows belonging to the project.
    async fn delete_project(&self, project_id: &str) -> Result<(), StorageError>;
}

/// Row store backing the per-project status table.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Creates the table with the given rows, replacing any previous one.
    async fn create_table(
        &self,
        project_id: &str,
        operation: &str,
        rows: &[StatusRow],
    ) -> Result<(), StorageError>;

    async fn table_info(&self, project_id: &str) -> Result<Option<StatusTableInfo>, StorageError>;

    /// Overwrites one row. Returns false if the table or the row does not exist.
    async fn upsert_row(&self, project_id: &str, row: &StatusRow) -> Result<bool, StorageError>;

    /// `None` when no table exists.
    async fn read_rows(&self, project_id: &str) -> Result<Option<Vec<StatusRow>>, StorageError>;

    /// Deletes the table. Returns whether one existed.
    async fn delete_table(&self, project_id: &str) -> Result<bool, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("record num={num} not found in project {project_id}")]
    RecordNotFound { project_id: String, num: i64 },
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
