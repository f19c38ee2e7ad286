use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::embedder::EmbeddingModel;
use super::RetrievalError;
use crate::models::{CorpusCase, Finding, ReportRecord};

/// Embedding batch size while building the index.
const EMBED_BATCH: usize = 64;

/// Query text used when the classifier reports nothing above threshold.
pub const NO_FINDINGS_QUERY: &str = "No significant abnormality detected";

/// Where the reference reports come from.
#[derive(Debug, Clone)]
pub enum CorpusSource {
    /// Records already in memory.
    Records(Vec<ReportRecord>),
    /// A JSON array of records, or one record per line (JSON Lines).
    JsonFile(PathBuf),
}

impl CorpusSource {
    pub fn describe(&self) -> String {
        match self {
            Self::Records(records) => format!("{} in-memory records", records.len()),
            Self::JsonFile(path) => path.display().to_string(),
        }
    }
}

/// Read all records from the source without embedding them.
pub fn load_records(source: &CorpusSource) -> Result<Vec<ReportRecord>, RetrievalError> {
    match source {
        CorpusSource::Records(records) => Ok(records.clone()),
        CorpusSource::JsonFile(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| RetrievalError::CorpusIo {
                path: path.clone(),
                source,
            })?;
            let records = parse_records(&raw)?;
            info!(path = %path.display(), records = records.len(), "Corpus file read");
            Ok(records)
        }
    }
}

fn parse_records(raw: &str) -> Result<Vec<ReportRecord>, RetrievalError> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| RetrievalError::CorpusParse(e.to_string()));
    }

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<ReportRecord>(line)
                .map_err(|e| RetrievalError::CorpusParse(format!("line {}: {e}", idx + 1)))
        })
        .collect()
}

/// Embed every usable record. Records with neither findings nor impression
/// are skipped; records without an id get `case-{row}`.
pub fn embed_corpus(
    records: &[ReportRecord],
    embedder: &dyn EmbeddingModel,
) -> Result<Vec<CorpusCase>, RetrievalError> {
    let prepared: Vec<(String, String)> = records
        .iter()
        .enumerate()
        .filter_map(|(row, record)| {
            let text = record.report_text()?;
            let id = record
                .id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("case-{row}"));
            Some((id, text))
        })
        .collect();

    let skipped = records.len() - prepared.len();
    if skipped > 0 {
        warn!(skipped, "Skipped corpus records without findings or impression");
    }
    if prepared.is_empty() {
        return Err(RetrievalError::EmptyCorpus);
    }

    let mut cases = Vec::with_capacity(prepared.len());
    for chunk in prepared.chunks(EMBED_BATCH) {
        let texts: Vec<&str> = chunk.iter().map(|(_, text)| text.as_str()).collect();
        let embeddings = embedder.embed_batch(&texts)?;
        if embeddings.len() != chunk.len() {
            return Err(RetrievalError::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                embeddings.len(),
                chunk.len()
            )));
        }
        cases.extend(
            chunk
                .iter()
                .zip(embeddings)
                .map(|((id, text), embedding)| CorpusCase {
                    id: id.clone(),
                    report_text: text.clone(),
                    embedding,
                }),
        );
        debug!(embedded = cases.len(), total = prepared.len(), "Embedding corpus");
    }

    Ok(cases)
}

/// Text embedded to look up similar cases for a set of findings.
pub fn query_text(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return NO_FINDINGS_QUERY.to_string();
    }
    findings
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
