use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{OperationError, OperationKind, OperationOutput, Part, RecordOperation};
use crate::backend::{SpeechRequest, TtsBackend};
use crate::config::TtsConfig;
use crate::logger::ProjectLogger;
use crate::project::{ProjectInfo, ProjectStore, Side};
use crate::storage::Record;

/// Global fallback voices, one per side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceDefaults {
    pub question: String,
    pub answer: String,
}

impl VoiceDefaults {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            question: config.default_voice_question.clone(),
            answer: config.default_voice_answer.clone(),
        }
    }

    fn for_side(&self, side: Side) -> &str {
        match side {
            Side::Pregunta => &self.question,
            Side::Respuesta => &self.answer,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsOptions {
    #[serde(default)]
    pub part: Part,
    /// Voice for every synthesized side, over the project's voices
    #[serde(default, alias = "voice")]
    pub voice_override: Option<String>,
    /// Delivery instructions for every side, over the record's annotations
    #[serde(default, alias = "instructions", alias = "prompt_override")]
    pub instructions_override: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Voice precedence: explicit override, then the project's role voice, then
/// the global default for the side.
pub fn resolve_voice(side: Side, voice_override: Option<&str>, info: &ProjectInfo, defaults: &VoiceDefaults) -> String {
    let project_voice = match side {
        Side::Pregunta => info.interviewer.voice.as_deref(),
        Side::Respuesta => info.interviewee.voice.as_deref(),
    };
    non_blank(voice_override)
        .or_else(|| non_blank(project_voice))
        .unwrap_or_else(|| defaults.for_side(side))
        .to_string()
}

/// Override when given, else the record's annotation for the side, else none.
pub fn resolve_instructions(side: Side, instructions_override: Option<&str>, record: &Record) -> Option<String> {
    let annotation = match side {
        Side::Pregunta => record.entonacion_p.as_str(),
        Side::Respuesta => record.entonacion_r.as_str(),
    };
    non_blank(instructions_override)
        .or_else(|| non_blank(Some(annotation)))
        .map(str::to_string)
}

fn side_text(record: &Record, side: Side) -> &str {
    match side {
        Side::Pregunta => &record.pregunta,
        Side::Respuesta => &record.respuesta,
    }
}

/// Synthesizes one or both sides of a record to `<project>/<num>/{p,r}<num>.mp3`.
pub struct TtsSynthesizeOperation {
    tts: Arc<dyn TtsBackend>,
    projects: ProjectStore,
    logger: ProjectLogger,
    defaults: VoiceDefaults,
    options: TtsOptions,
}

impl TtsSynthesizeOperation {
    pub fn new(
        tts: Arc<dyn TtsBackend>,
        projects: ProjectStore,
        logger: ProjectLogger,
        defaults: VoiceDefaults,
        options: TtsOptions,
    ) -> Self {
        Self {
            tts,
            projects,
            logger,
            defaults,
            options,
        }
    }
}

#[async_trait]
impl RecordOperation for TtsSynthesizeOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Tts
    }

    async fn apply(
        &self,
        project_id: &str,
        record: &Record,
        project: &ProjectInfo,
    ) -> Result<OperationOutput, OperationError> {
        let mut written = Vec::new();

        for side in self.options.part.sides() {
            let text = side_text(record, side);
            if text.trim().is_empty() {
                self.logger
                    .info(
                        project_id,
                        format!("TTS skip num={} side={:?}: empty text", record.num, side),
                    )
                    .await;
                continue;
            }

            let request = SpeechRequest {
                text: text.to_string(),
                voice: resolve_voice(side, self.options.voice_override.as_deref(), project, &self.defaults),
                instructions: resolve_instructions(side, self.options.instructions_override.as_deref(), record),
            };
            let out_path = self.projects.audio_path(project_id, record.num, side);

            self.logger
                .debug(
                    project_id,
                    format!(
                        "TTS num={} side={:?} voice={} instructions={}",
                        record.num,
                        side,
                        request.voice,
                        request.instructions.as_deref().unwrap_or("-")
                    ),
                )
                .await;

            match self.tts.synthesize(&request, &out_path).await {
                Ok(path) => {
                    self.logger
                        .info(project_id, format!("TTS wrote {}", path.display()))
                        .await;
                    written.push(path);
                }
                Err(e) => {
                    self.logger
                        .error(
                            project_id,
                            format!("TTS failed for num={} side={:?}: {}", record.num, side, e),
                        )
                        .await;
                    return Err(e.into());
                }
            }
        }

        Ok(OperationOutput::Synthesized(written))
    }
}
