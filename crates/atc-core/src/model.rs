//! Domain model (`spec.md` §3). Immutable configuration entities and the
//! records the persistence layer reads/writes.

use atc_protocol::{ClearanceId, FrequencyId, SpeakerType, TranscriptionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable per-frequency configuration, created at startup and never
/// mutated (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frequency {
    pub id: FrequencyId,
    pub name: String,
    pub source_url: String,
    pub transcribe: bool,
    pub order: i32,
}

/// Runtime lifecycle of a `StreamSession` (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLifecycle {
    Init,
    Running,
    Stopped,
}

/// Sentinel values written into `content_processed` on post-processing
/// failure, per `spec.md` §4.6's "Application of results" clause.
pub mod sentinel {
    pub const PROCESSING_FAILED: &str = "[PROCESSING_FAILED]";
    pub const NO_RESULTS_FROM_API: &str = "[NO_RESULTS_FROM_API]";
    pub const TEMPLATE_RENDER_FAILED: &str = "[TEMPLATE_RENDER_FAILED]";
}

/// A persisted transcription row (`spec.md` §3).
///
/// Invariant: once `is_processed` is true, `content_processed` is
/// `Some(_)` and non-empty (a sentinel marks failed processing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionRecord {
    pub id: TranscriptionId,
    pub frequency_id: FrequencyId,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub is_complete: bool,
    pub is_processed: bool,
    pub content_processed: Option<String>,
    pub speaker_type: Option<SpeakerType>,
    pub callsign: Option<String>,
}

impl TranscriptionRecord {
    /// Construct the row inserted on a `completed` STT event
    /// (`is_processed=false`, per `spec.md` §4.5).
    pub fn new_completed(frequency_id: FrequencyId, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            frequency_id,
            created_at: Utc::now(),
            content,
            is_complete: true,
            is_processed: false,
            content_processed: None,
            speaker_type: None,
            callsign: None,
        }
    }
}

/// A structured instruction extracted from an ATC utterance (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clearance {
    pub id: ClearanceId,
    pub transcription_id: TranscriptionId,
    pub callsign: String,
    pub clearance_type: String,
    pub text: String,
    pub runway: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub status: String,
}

impl Clearance {
    pub fn issued(
        transcription_id: TranscriptionId,
        callsign: String,
        clearance_type: String,
        text: String,
        runway: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            transcription_id,
            callsign,
            clearance_type,
            text,
            runway,
            issued_at: Utc::now(),
            status: "issued".to_owned(),
        }
    }
}

/// A provider-side speech session (`spec.md` §3). Usable only while
/// `active && now < expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSession {
    pub id: String,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub config: serde_json::Value,
    pub system_prompt: String,
    pub client_secret: Option<String>,
}

impl SttSession {
    pub fn is_usable(&self) -> bool {
        self.active && Utc::now() < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_completed_transcription_starts_unprocessed() {
        let rec = TranscriptionRecord::new_completed(uuid::Uuid::nil(), "roger".to_owned());
        assert!(rec.is_complete);
        assert!(!rec.is_processed);
        assert!(rec.content_processed.is_none());
    }

    #[test]
    fn stt_session_is_unusable_once_expired() {
        let mut session = SttSession {
            id: "s1".to_owned(),
            provider_id: "realtime".to_owned(),
            created_at: Utc::now(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            active: true,
            config: serde_json::json!({}),
            system_prompt: String::new(),
            client_secret: None,
        };
        assert!(!session.is_usable());
        session.expires_at = Utc::now() + chrono::Duration::seconds(60);
        assert!(session.is_usable());
        session.active = false;
        assert!(!session.is_usable());
    }
}
