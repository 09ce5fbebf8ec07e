//! Transcription processor: drives one STT session from a fan-out reader
//! and lands completions into storage and the event bus (`spec.md` §4.5,
//! component C5).

use std::sync::Arc;
use std::time::Duration;

use atc_core::{TranscriptionRecord, TranscriptionStore};
use atc_eventbus::Publisher;
use atc_fanout::Reader;
use atc_protocol::{BusMessage, FrequencyId, TranscriptionEvent, TranscriptionPayload};
use atc_stt::{RealtimeProvider, RealtimeSession, SttError};
use base64::Engine;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Consecutive audio-send failures after which C5 gives up on the current
/// [`RealtimeSession`] entirely and builds a new one from scratch, rather
/// than continuing to retry against a connection the adapter's own
/// internal reconnect budget has already exhausted (`spec.md` §4.5).
const FATAL_RETRY_THRESHOLD: u32 = 5;
const BASE_RETRY_BACKOFF: Duration = Duration::from_millis(100);
const MAX_RETRY_BACKOFF: Duration = Duration::from_millis(6_400);

#[derive(Clone, Copy, Debug)]
pub struct ChunkConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_ms: u32,
}

pub struct TranscriptionProcessor {
    audio_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
}

impl TranscriptionProcessor {
    pub async fn start(
        frequency_id: FrequencyId,
        chunk_cfg: ChunkConfig,
        reader: Reader,
        provider: Arc<dyn RealtimeProvider>,
        system_prompt: String,
        store: Arc<dyn TranscriptionStore>,
        publisher: Publisher,
    ) -> Result<Self, SttError> {
        let session = RealtimeSession::create(provider.clone(), system_prompt.clone()).await?;
        let session = Arc::new(Mutex::new(session));

        let audio_task = tokio::spawn(audio_loop(
            reader,
            chunk_cfg,
            session.clone(),
            provider.clone(),
            system_prompt.clone(),
        ));
        let event_task = tokio::spawn(event_loop(
            frequency_id,
            session,
            provider,
            system_prompt,
            store,
            publisher,
        ));

        Ok(Self { audio_task, event_task })
    }

    pub async fn stop(self) {
        self.audio_task.abort();
        self.event_task.abort();
        let _ = self.audio_task.await;
        let _ = self.event_task.await;
    }
}

async fn rebuild_session(
    session: &Mutex<RealtimeSession>,
    provider: &Arc<dyn RealtimeProvider>,
    system_prompt: &str,
) {
    match RealtimeSession::create(provider.clone(), system_prompt.to_owned()).await {
        Ok(fresh) => {
            *session.lock().await = fresh;
            info!("rebuilt realtime stt session after exhausting retry budget");
        }
        Err(e) => error!(error = %e, "failed to rebuild realtime stt session"),
    }
}

async fn audio_loop(
    mut reader: Reader,
    chunk_cfg: ChunkConfig,
    session: Arc<Mutex<RealtimeSession>>,
    provider: Arc<dyn RealtimeProvider>,
    system_prompt: String,
) {
    let mut chunker = crate::chunker::Chunker::new(chunk_cfg.sample_rate, chunk_cfg.channels, chunk_cfg.chunk_ms);
    let mut consecutive_errors: u32 = 0;

    while let Some(data) = reader.read().await {
        for chunk in chunker.push(&data) {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&chunk);
            loop {
                let outcome = session.lock().await.send_audio_chunk(encoded.clone()).await;
                match outcome {
                    Ok(()) => {
                        consecutive_errors = 0;
                        break;
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        warn!(error = %e, consecutive_errors, "audio chunk send failed");
                        if consecutive_errors >= FATAL_RETRY_THRESHOLD {
                            rebuild_session(&session, &provider, &system_prompt).await;
                            consecutive_errors = 0;
                            break;
                        }
                        let backoff = (BASE_RETRY_BACKOFF * 2u32.pow(consecutive_errors - 1)).min(MAX_RETRY_BACKOFF);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    }
}

async fn event_loop(
    frequency_id: FrequencyId,
    session: Arc<Mutex<RealtimeSession>>,
    provider: Arc<dyn RealtimeProvider>,
    system_prompt: String,
    store: Arc<dyn TranscriptionStore>,
    publisher: Publisher,
) {
    loop {
        let outcome = session.lock().await.next_event().await;
        match outcome {
            Ok(TranscriptionEvent::Delta { text }) => {
                publisher
                    .publish(BusMessage::TranscriptionUpdate(transient_payload(frequency_id, text)))
                    .await;
            }
            Ok(TranscriptionEvent::Completed { text }) => {
                let record = TranscriptionRecord::new_completed(frequency_id, text.clone());
                match store.insert_transcription(&record).await {
                    Ok(id) => {
                        publisher
                            .publish(BusMessage::Transcription(TranscriptionPayload {
                                id,
                                frequency_id,
                                text,
                                timestamp: record.created_at.to_rfc3339(),
                                is_complete: true,
                                is_processed: false,
                                content_processed: None,
                            }))
                            .await;
                    }
                    Err(e) => error!(error = %e, "failed to persist completed transcription"),
                }
            }
            Ok(TranscriptionEvent::Error { code, message }) if code == "session_expired" => {
                warn!(code, message, "stt session expired, rebuilding");
                rebuild_session(&session, &provider, &system_prompt).await;
            }
            Ok(TranscriptionEvent::Error { code, message }) => {
                warn!(code, message, "stt provider error, continuing");
            }
            Err(SttError::Fatal(failures)) => {
                error!(failures, "stt reconnect budget exhausted, rebuilding session");
                rebuild_session(&session, &provider, &system_prompt).await;
            }
            Err(e) => {
                warn!(error = %e, "unexpected error reading stt event");
            }
        }
    }
}

fn transient_payload(frequency_id: FrequencyId, text: String) -> TranscriptionPayload {
    TranscriptionPayload {
        id: uuid::Uuid::nil(),
        frequency_id,
        text,
        timestamp: Utc::now().to_rfc3339(),
        is_complete: false,
        is_processed: false,
        content_processed: None,
    }
}
