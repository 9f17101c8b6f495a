//! Splitting an extracted interview transcript into question/answer records.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::logger::ProjectLogger;
use crate::storage::{Record, RecordStore, StorageError};

fn question_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)pregunta:").expect("question marker pattern is valid"))
}

/// A question marker that opens a new block: it must start a line.
fn block_boundary() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\n\s*pregunta:").expect("block boundary pattern is valid"))
}

fn answer_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)respuesta:").expect("answer marker pattern is valid"))
}

fn whitespace_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Drop soft hyphens and collapse whitespace runs to one space.
pub fn normalize(text: &str) -> String {
    let without_soft_hyphens = text.replace('\u{00AD}', "");
    whitespace_run()
        .replace_all(&without_soft_hyphens, " ")
        .trim()
        .to_string()
}

/// Extract `(question, answer)` pairs.
///
/// Text before the first `Pregunta:` is ignored. Each block runs until the
/// next line starting with `Pregunta:` or the end of the text, and splits at
/// its first `Respuesta:`. Blocks without an answer marker are skipped, as
/// are pairs where both sides normalize to empty.
pub fn extract_pairs(text: &str) -> Vec<(String, String)> {
    let Some(first) = question_marker().find(text) else {
        return Vec::new();
    };

    let mut blocks = Vec::new();
    let mut rest = &text[first.end()..];
    while let Some(boundary) = block_boundary().find(rest) {
        blocks.push(&rest[..boundary.start()]);
        rest = &rest[boundary.end()..];
    }
    blocks.push(rest);

    blocks
        .into_iter()
        .filter_map(|block| {
            let marker = answer_marker().find(block)?;
            let question = normalize(&block[..marker.start()]);
            let answer = normalize(&block[marker.end()..]);
            if question.is_empty() && answer.is_empty() {
                None
            } else {
                Some((question, answer))
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    /// Records now stored for the project
    pub records: usize,
    /// False when existing records were kept because `overwrite` was not set
    pub replaced: bool,
}

/// Store the pairs found in `text` as the project's records, numbered from 1.
/// Existing records are kept unless `overwrite` is set.
pub async fn import(
    records: &dyn RecordStore,
    logger: &ProjectLogger,
    project_id: &str,
    text: &str,
    overwrite: bool,
) -> Result<ImportResult, StorageError> {
    logger
        .info(project_id, format!("import called (overwrite={})", overwrite))
        .await;

    let existing = records.count_records(project_id).await?;
    if existing > 0 && !overwrite {
        logger
            .info(
                project_id,
                format!("import: {} records exist and overwrite=false, keeping them", existing),
            )
            .await;
        return Ok(ImportResult {
            records: existing,
            replaced: false,
        });
    }

    let pairs = extract_pairs(text);
    logger
        .info(project_id, format!("import: extracted {} pairs", pairs.len()))
        .await;

    let new_records: Vec<Record> = pairs
        .into_iter()
        .zip(1..)
        .map(|((question, answer), num)| Record::new(num, question, answer))
        .collect();
    records.replace_records(project_id, &new_records).await?;

    logger
        .info(project_id, format!("import: wrote {} records", new_records.len()))
        .await;
    Ok(ImportResult {
        records: new_records.len(),
        replaced: true,
    })
}
