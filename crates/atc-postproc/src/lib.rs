//! Post-processor (`spec.md` §4.6, component C6): periodically turns a
//! batch of unprocessed transcriptions into speaker/callsign/clearance
//! enriched records via an LLM chat call.

mod batch;
mod extract;

pub use batch::{BatchRow, RenderError, StaticPromptRenderer, SystemPromptRenderer};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atc_core::model::sentinel;
use atc_core::{Clearance, Store, TranscriptionRecord};
use atc_eventbus::Publisher;
use atc_protocol::{BusMessage, ClearancePayload, SpeakerType, TranscriptionPayload};
use atc_stt::ChatProvider;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const TEMPERATURE: f32 = 0.0;
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct PostProcessorConfig {
    pub interval: Duration,
    pub batch_size: u32,
    pub context_count: u32,
}

pub struct PostProcessor {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PostProcessor {
    pub fn start(
        cfg: PostProcessorConfig,
        store: Arc<dyn Store>,
        chat: Arc<dyn ChatProvider>,
        renderer: Arc<dyn SystemPromptRenderer>,
        publisher: Publisher,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(cfg, store, chat, renderer, publisher, stop.clone()));
        Self { stop, task }
    }

    /// Signal the loop to stop after draining whatever tick it's currently
    /// in, bounded by the orchestrator's overall shutdown timeout
    /// (`spec.md` §4.9).
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.task.await;
    }
}

async fn run(
    cfg: PostProcessorConfig,
    store: Arc<dyn Store>,
    chat: Arc<dyn ChatProvider>,
    renderer: Arc<dyn SystemPromptRenderer>,
    publisher: Publisher,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        match tick(&cfg, &store, &chat, &renderer, &publisher).await {
            Ok(0) => tokio::time::sleep(cfg.interval).await,
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "post-processing tick failed unexpectedly");
                tokio::time::sleep(cfg.interval).await;
            }
        }
    }
}

/// Run one control-loop iteration; returns the number of records taken
/// from the batch (0 means nothing was due).
async fn tick(
    cfg: &PostProcessorConfig,
    store: &Arc<dyn Store>,
    chat: &Arc<dyn ChatProvider>,
    renderer: &Arc<dyn SystemPromptRenderer>,
    publisher: &Publisher,
) -> Result<usize, atc_core::StoreError> {
    let unprocessed = store.get_unprocessed_transcriptions(cfg.batch_size).await?;
    if unprocessed.is_empty() {
        return Ok(0);
    }

    // Open Question decision #1 (spec.md §9): batches never mix
    // frequencies, even though the store query itself is not scoped by
    // frequency — take only the leading same-frequency run.
    let frequency_id = unprocessed[0].frequency_id;
    let batch: Vec<TranscriptionRecord> = unprocessed
        .into_iter()
        .take_while(|r| r.frequency_id == frequency_id)
        .collect();
    let batch_ids: std::collections::HashSet<_> = batch.iter().map(|r| r.id).collect();

    let context = store
        .get_last_processed_transcriptions(frequency_id, cfg.context_count)
        .await?;
    let rows = batch::merge_sorted(&context, &batch);
    let user_message = match serde_json::to_string(&rows) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "failed to serialize post-processing batch, marking failed");
            fail_batch(store, publisher, &batch, sentinel::PROCESSING_FAILED).await;
            return Ok(batch.len());
        }
    };

    let system_prompt = match renderer.render() {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "system prompt render failed");
            fail_batch(store, publisher, &batch, sentinel::TEMPLATE_RENDER_FAILED).await;
            return Ok(batch.len());
        }
    };

    let response = match chat.chat_completion(&system_prompt, &user_message, TEMPERATURE, MAX_TOKENS).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "chat completion call failed");
            fail_batch(store, publisher, &batch, sentinel::PROCESSING_FAILED).await;
            return Ok(batch.len());
        }
    };

    let Some(array_text) = extract::outermost_array(&response) else {
        warn!("llm response contained no json array");
        fail_batch(store, publisher, &batch, sentinel::NO_RESULTS_FROM_API).await;
        return Ok(batch.len());
    };

    let parsed: Vec<BatchRow> = match serde_json::from_str(array_text) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "failed to parse extracted llm json array");
            fail_batch(store, publisher, &batch, sentinel::PROCESSING_FAILED).await;
            return Ok(batch.len());
        }
    };

    apply_results(store, publisher, frequency_id, &parsed, &batch_ids).await;
    info!(frequency_id = %frequency_id, batch_size = batch.len(), "post-processed transcription batch");
    Ok(batch.len())
}

async fn apply_results(
    store: &Arc<dyn Store>,
    publisher: &Publisher,
    frequency_id: atc_protocol::FrequencyId,
    rows: &[BatchRow],
    batch_ids: &std::collections::HashSet<atc_protocol::TranscriptionId>,
) {
    for row in rows {
        if !batch_ids.contains(&row.id) {
            continue;
        }
        let content_processed = row.content_processed.clone().unwrap_or_default();
        if let Err(e) = store
            .update_processed(row.id, &content_processed, row.speaker_type, row.callsign.as_deref())
            .await
        {
            error!(id = %row.id, error = %e, "failed to persist post-processed transcription");
            continue;
        }
        publisher
            .publish(BusMessage::TranscriptionUpdate(TranscriptionPayload {
                id: row.id,
                frequency_id,
                text: row.content.clone(),
                timestamp: row.timestamp.clone(),
                is_complete: true,
                is_processed: true,
                content_processed: Some(content_processed),
            }))
            .await;

        if row.speaker_type == Some(SpeakerType::Atc) && !row.clearances.is_empty() {
            for clearance_json in &row.clearances {
                let clearance = Clearance::issued(
                    row.id,
                    clearance_json.callsign.clone(),
                    clearance_json.clearance_type.clone(),
                    clearance_json.text.clone(),
                    clearance_json.runway.clone(),
                );
                if let Err(e) = store.insert_clearance(&clearance).await {
                    error!(id = %row.id, error = %e, "failed to persist clearance");
                    continue;
                }
                publisher
                    .publish(BusMessage::ClearanceIssued(ClearancePayload {
                        id: clearance.id,
                        transcription_id: clearance.transcription_id,
                        callsign: clearance.callsign.clone(),
                        clearance_type: clearance.clearance_type.clone(),
                        text: clearance.text.clone(),
                        runway: clearance.runway.clone(),
                        issued_at: clearance.issued_at.to_rfc3339(),
                    }))
                    .await;
            }
        }
    }
}

/// Sentinel every record in a failed batch, unconditionally marking
/// `isProcessed=true` so it is never retried indefinitely
/// (`spec.md` §4.6's "Application of results" clause).
async fn fail_batch(store: &Arc<dyn Store>, publisher: &Publisher, batch: &[TranscriptionRecord], sentinel: &str) {
    for record in batch {
        if let Err(e) = store.update_processed(record.id, sentinel, None, None).await {
            error!(id = %record.id, error = %e, "failed to mark transcription as failed");
            continue;
        }
        publisher
            .publish(BusMessage::TranscriptionUpdate(TranscriptionPayload {
                id: record.id,
                frequency_id: record.frequency_id,
                text: record.content.clone(),
                timestamp: record.created_at.to_rfc3339(),
                is_complete: true,
                is_processed: true,
                content_processed: Some(sentinel.to_owned()),
            }))
            .await;
    }
}
