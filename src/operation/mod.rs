//! Per-record units of work run by the batch runner: LLM cleanup and TTS
//! synthesis. Both share [`RecordOperation`].

pub mod llm;
pub mod tts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::backend::BackendError;
use crate::project::{ProjectInfo, Side};
use crate::storage::{Record, StorageError};

pub use llm::{LlmCleanOperation, LlmOptions};
pub use tts::{TtsOptions, TtsSynthesizeOperation, VoiceDefaults};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Llm,
    Tts,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Llm => "llm",
            OperationKind::Tts => "tts",
        }
    }

    /// LLM pollers wait for `processed == total` on a surviving table; TTS
    /// pollers wait for the table to disappear.
    pub fn retain_status_on_completion(self) -> bool {
        match self {
            OperationKind::Llm => true,
            OperationKind::Tts => false,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side(s) of a record an operation touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Part {
    Pregunta,
    Respuesta,
    #[default]
    Both,
}

impl Part {
    pub fn includes(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Part::Both, _) | (Part::Pregunta, Side::Pregunta) | (Part::Respuesta, Side::Respuesta)
        )
    }

    pub fn sides(self) -> Vec<Side> {
        [Side::Pregunta, Side::Respuesta]
            .into_iter()
            .filter(|side| self.includes(*side))
            .collect()
    }
}

impl FromStr for Part {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pregunta" => Ok(Part::Pregunta),
            "respuesta" => Ok(Part::Respuesta),
            "both" | "all" => Ok(Part::Both),
            other => Err(OperationError::InvalidRequest(format!(
                "part must be 'pregunta', 'respuesta' or 'both', got '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Part {
    type Error = OperationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutput {
    /// The record as written back to the record store
    Updated(Record),
    /// Audio files written
    Synthesized(Vec<PathBuf>),
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("backend call failed: {0}")]
    Backend(#[from] BackendError),

    #[error("record num={0} not found")]
    RecordNotFound(i64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for OperationError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::RecordNotFound { num, .. } => OperationError::RecordNotFound(num),
            other => OperationError::Storage(other),
        }
    }
}

impl OperationError {
    /// Persistence failures abort the whole run; everything else is
    /// recorded against the record and the run continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OperationError::Storage(_))
    }
}

#[async_trait]
pub trait RecordOperation: Send + Sync {
    fn kind(&self) -> OperationKind;

    fn retain_status_on_completion(&self) -> bool {
        self.kind().retain_status_on_completion()
    }

    async fn apply(
        &self,
        project_id: &str,
        record: &Record,
        project: &ProjectInfo,
    ) -> Result<OperationOutput, OperationError>;
}
