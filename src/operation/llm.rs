use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{OperationError, OperationKind, OperationOutput, Part, RecordOperation};
use crate::backend::{LlmBackend, LlmOutput, LlmRequest};
use crate::logger::ProjectLogger;
use crate::project::{ProjectInfo, Side};
use crate::storage::{Record, RecordStore, RecordUpdate};

pub const SYSTEM_PROMPT: &str = "Eres un asistente que corrige y normaliza transcripciones de entrevistas \
y propone pautas de entonación para síntesis de voz. Para cada par pregunta/respuesta devuelve el texto \
limpio y natural, sin cambiar su sentido, y una pauta breve de entonación por cada parte: ritmo, pausas, \
tono y cualquier matiz expresivo útil para la voz. Conserva el idioma y la variante del original salvo \
que el contexto del proyecto indique otra cosa, y usa ese contexto para afinar las pautas.";

/// Used when the model gives no annotation for the question.
pub const DEFAULT_ANNOTATION_QUESTION: &str = "Pauta para la pregunta (entrevistador): tono, ritmo, \
pausas y marcas expresivas (por ejemplo: curioso, enérgico, calmado), adaptadas al idioma, acento y voz \
del proyecto.";

/// Used when the model gives no annotation for the answer.
pub const DEFAULT_ANNOTATION_ANSWER: &str = "Pauta para la respuesta (persona entrevistada): tono, ritmo, \
pausas y marcas expresivas (por ejemplo: sereno, solemne, emocionado), adaptadas al idioma, acento y voz \
del proyecto.";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmOptions {
    /// Replace the question/answer texts with the cleaned versions
    #[serde(default = "default_true")]
    pub overwrite_texts: bool,
    /// Replace the intonation annotations
    #[serde(default = "default_true")]
    pub overwrite_prompts: bool,
    #[serde(default)]
    pub part: Part,
    /// Overrides the project-level prompt stored in the project info
    #[serde(default)]
    pub project_prompt: Option<String>,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            overwrite_texts: true,
            overwrite_prompts: true,
            part: Part::Both,
            project_prompt: None,
        }
    }
}

/// Context line describing language, accent and voices of the project.
pub fn project_context(info: &ProjectInfo, project_prompt: Option<&str>) -> String {
    let language = [&info.interviewer.language, &info.interviewee.language]
        .into_iter()
        .find(|l| !l.is_empty())
        .map(String::as_str)
        .unwrap_or("es");
    let accent = [&info.interviewer.accent, &info.interviewee.accent]
        .into_iter()
        .find(|a| !a.is_empty())
        .map(String::as_str)
        .unwrap_or("");

    let mut context = String::new();
    if let Some(prompt) = project_prompt {
        context.push_str(prompt);
        context.push('\n');
    }
    context.push_str(&format!(
        "idioma={}, acento={}. Voz entrevistador={}, voz entrevistada={}. \
         Ten en cuenta idioma, acento y voces al proponer entonaciones y adaptar la pronunciación.",
        language,
        accent,
        info.interviewer.voice.as_deref().unwrap_or(""),
        info.interviewee.voice.as_deref().unwrap_or(""),
    ));
    context
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

/// Fields to write back for one model result. Cleaned texts are only taken
/// when present; annotations fall back to the default templates.
pub fn build_update(output: &LlmOutput, options: &LlmOptions) -> RecordUpdate {
    let mut update = RecordUpdate::default();

    if options.overwrite_texts {
        if options.part.includes(Side::Pregunta) {
            update.pregunta = non_empty(&output.pregunta_limpia);
        }
        if options.part.includes(Side::Respuesta) {
            update.respuesta = non_empty(&output.respuesta_limpia);
        }
    }

    if options.overwrite_prompts {
        if options.part.includes(Side::Pregunta) {
            update.entonacion_p = Some(
                non_empty(&output.entonacion_p)
                    .unwrap_or_else(|| DEFAULT_ANNOTATION_QUESTION.to_string()),
            );
        }
        if options.part.includes(Side::Respuesta) {
            update.entonacion_r = Some(
                non_empty(&output.entonacion_r)
                    .unwrap_or_else(|| DEFAULT_ANNOTATION_ANSWER.to_string()),
            );
        }
    }

    update
}

/// Cleans a record's texts and writes intonation annotations via the LLM.
pub struct LlmCleanOperation {
    llm: Arc<dyn LlmBackend>,
    records: Arc<dyn RecordStore>,
    logger: ProjectLogger,
    options: LlmOptions,
}

impl LlmCleanOperation {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        records: Arc<dyn RecordStore>,
        logger: ProjectLogger,
        options: LlmOptions,
    ) -> Self {
        Self {
            llm,
            records,
            logger,
            options,
        }
    }

    pub fn options(&self) -> &LlmOptions {
        &self.options
    }
}

#[async_trait]
impl RecordOperation for LlmCleanOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Llm
    }

    async fn apply(
        &self,
        project_id: &str,
        record: &Record,
        project: &ProjectInfo,
    ) -> Result<OperationOutput, OperationError> {
        let prompt = self
            .options
            .project_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| project.prompt());

        let request = LlmRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            context: project_context(project, prompt),
            pregunta: record.pregunta.clone(),
            respuesta: record.respuesta.clone(),
        };

        if let Ok(json) = serde_json::to_string(&request) {
            self.logger
                .debug(project_id, format!("LLM input num={}: {}", record.num, json))
                .await;
        }

        let output = match self.llm.complete(&request).await {
            Ok(output) => output,
            Err(e) => {
                self.logger
                    .error(project_id, format!("LLM call failed for num={}: {}", record.num, e))
                    .await;
                return Err(e.into());
            }
        };

        let update = build_update(&output, &self.options);
        let updated = if update.is_empty() {
            record.clone()
        } else {
            self.records.update_record(project_id, record.num, &update).await?
        };

        Ok(OperationOutput::Updated(updated))
    }
}
