//! Narrow persistence contracts the core reads/writes (`spec.md` §4.8).
//!
//! Mirrors the shape of the teacher's `repo::events` functions — one
//! method per operation the core actually performs, not a generic CRUD
//! layer — but expressed as a trait so `atc-transcribe` and `atc-postproc`
//! depend on an interface rather than a concrete database.

use crate::model::{Clearance, TranscriptionRecord};
use async_trait::async_trait;
use atc_protocol::{FrequencyId, SpeakerType, TranscriptionId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Transactional requirement (`spec.md` §4.8): `insert_transcription` and
/// `update_processed` must be atomic per row; no cross-row transaction is
/// required of implementors.
#[async_trait]
pub trait TranscriptionStore: Send + Sync {
    async fn insert_transcription(
        &self,
        record: &TranscriptionRecord,
    ) -> Result<TranscriptionId, StoreError>;

    /// Oldest first, `is_complete=true && is_processed=false`.
    async fn get_unprocessed_transcriptions(
        &self,
        batch_size: u32,
    ) -> Result<Vec<TranscriptionRecord>, StoreError>;

    async fn update_processed(
        &self,
        id: TranscriptionId,
        content_processed: &str,
        speaker_type: Option<SpeakerType>,
        callsign: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Most recent *processed* records for a frequency, used as causal
    /// context by the post-processor (`spec.md` §4.6 step 2).
    async fn get_last_processed_transcriptions(
        &self,
        frequency_id: FrequencyId,
        limit: u32,
    ) -> Result<Vec<TranscriptionRecord>, StoreError>;
}

#[async_trait]
pub trait ClearanceStore: Send + Sync {
    async fn insert_clearance(&self, record: &Clearance) -> Result<(), StoreError>;
}

/// Convenience supertrait for callers (C6) that need both contracts from a
/// single handle, matching how `AppState` bundles related repos behind one
/// `Arc` in the teacher's server crate.
pub trait Store: TranscriptionStore + ClearanceStore {}
impl<T: TranscriptionStore + ClearanceStore> Store for T {}
