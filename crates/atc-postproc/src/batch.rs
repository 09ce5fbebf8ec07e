use atc_core::TranscriptionRecord;
use atc_protocol::{ClearanceJson, SpeakerType, TranscriptionId};
use serde::{Deserialize, Serialize};

/// One row of the JSON array sent to and parsed back from the LLM
/// (`spec.md` §4.6 steps 3 and 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRow {
    pub id: TranscriptionId,
    pub content: String,
    #[serde(default)]
    pub content_processed: Option<String>,
    #[serde(default)]
    pub speaker_type: Option<SpeakerType>,
    #[serde(default)]
    pub callsign: Option<String>,
    #[serde(default)]
    pub clearances: Vec<ClearanceJson>,
    pub timestamp: String,
}

impl From<&TranscriptionRecord> for BatchRow {
    fn from(record: &TranscriptionRecord) -> Self {
        Self {
            id: record.id,
            content: record.content.clone(),
            content_processed: record.content_processed.clone(),
            speaker_type: record.speaker_type,
            callsign: record.callsign.clone(),
            clearances: Vec::new(),
            timestamp: record.created_at.to_rfc3339(),
        }
    }
}

/// Merge context (already-processed, older) and batch (new, unprocessed)
/// rows, sorted ascending by timestamp (`spec.md` §4.6 step 3).
pub fn merge_sorted(context: &[TranscriptionRecord], batch: &[TranscriptionRecord]) -> Vec<BatchRow> {
    let mut rows: Vec<BatchRow> = context.iter().chain(batch.iter()).map(BatchRow::from).collect();
    rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    rows
}

/// Produces the system prompt for a post-processing call. `spec.md` §4.6
/// step 4 describes this as "externally injected" — C6 depends only on
/// this trait, not on any specific templating engine.
pub trait SystemPromptRenderer: Send + Sync {
    fn render(&self) -> Result<String, RenderError>;
}

#[derive(Debug, thiserror::Error)]
#[error("system prompt template failed to render: {0}")]
pub struct RenderError(pub String);

/// The simplest conforming renderer: a fixed prompt string, no templating.
pub struct StaticPromptRenderer(pub String);

impl SystemPromptRenderer for StaticPromptRenderer {
    fn render(&self) -> Result<String, RenderError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atc_core::TranscriptionRecord;
    use chrono::{TimeZone, Utc};

    fn record_at(seconds: i64, content: &str) -> TranscriptionRecord {
        let mut r = TranscriptionRecord::new_completed(uuid::Uuid::nil(), content.to_owned());
        r.created_at = Utc.timestamp_opt(seconds, 0).unwrap();
        r
    }

    #[test]
    fn merge_sorted_interleaves_context_and_batch_by_time() {
        let context = vec![record_at(100, "context-1")];
        let batch = vec![record_at(50, "batch-1"), record_at(150, "batch-2")];
        let rows = merge_sorted(&context, &batch);
        let contents: Vec<_> = rows.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["batch-1", "context-1", "batch-2"]);
    }
}
