//! Service orchestrator (`spec.md` §4.9, component C9): wires a
//! `StreamSession` (C3), optional `TranscriptionProcessor` (C5), and
//! optional `PostProcessor` (C6) per configured frequency, plus the shared
//! event bus (C7) and admission control.
//!
//! Grounded on `services/server/src/main.rs`'s load-config → build-shared-
//! state → spawn → `with_graceful_shutdown` sequence, generalized from one
//! HTTP router into per-frequency pipelines plus the same router.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atc_core::{ClearanceStore, Store, TranscriptionStore};
use atc_decoder::DecoderConfig;
use atc_eventbus::{EventBus, Publisher};
use atc_postproc::{PostProcessor, PostProcessorConfig, StaticPromptRenderer};
use atc_protocol::FrequencyId;
use atc_stream_session::{ClientReader, SessionError, StreamSession};
use atc_stt::{HttpChatConfig, HttpChatProvider, RealtimeProvider, TurnDetectionConfig, WsRealtimeConfig, WsRealtimeProvider};
use atc_transcribe::{ChunkConfig, TranscriptionProcessor};
use axum::Router;
use tracing::{info, warn};

use crate::admission::{AdmissionControl, AdmissionError};
use crate::config::AtcServerConfig;

/// Bound on every individual stop operation during shutdown (`spec.md`
/// §4.9/§5).
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("unknown frequency {0}")]
    UnknownFrequency(FrequencyId),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("fanout error: {0}")]
    Fanout(#[from] atc_fanout::FanoutError),
    #[error("stt error: {0}")]
    Stt(#[from] atc_stt::SttError),
    #[error("failed to read post-processor system prompt: {0}")]
    SystemPrompt(std::io::Error),
}

struct FrequencyHandle {
    session: StreamSession,
    transcription: Option<TranscriptionProcessor>,
}

pub struct Orchestrator {
    frequencies: HashMap<FrequencyId, FrequencyHandle>,
    post_processor: Option<PostProcessor>,
    admission: Arc<AdmissionControl>,
    router: Router,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Generic over the concrete store so a single `Arc<S>` can be unsized
    /// to both `Arc<dyn TranscriptionStore>` (for C5) and `Arc<dyn Store>`
    /// (for C6) without relying on trait-object upcasting.
    pub async fn start<S>(cfg: AtcServerConfig, store: Arc<S>) -> Result<Self, OrchestratorError>
    where
        S: TranscriptionStore + ClearanceStore + 'static,
    {
        let bus = EventBus::new();
        let publisher = bus.publisher();
        let router = bus.router();

        if !cfg.server.additional_ports.is_empty() {
            warn!(
                ports = ?cfg.server.additional_ports,
                "server.additional_ports configured but per-frequency audio listener sockets are an external HTTP concern, not served here"
            );
        }

        let mut frequencies = HashMap::with_capacity(cfg.frequencies.len());
        for freq in &cfg.frequencies {
            let transcription_store: Arc<dyn TranscriptionStore> = store.clone();
            let handle = start_frequency(freq, &cfg, transcription_store, publisher.clone()).await?;
            frequencies.insert(freq.id, handle);
        }

        let post_processor = if cfg.post.enabled {
            let full_store: Arc<dyn Store> = store;
            Some(start_post_processor(&cfg, full_store, publisher).await?)
        } else {
            None
        };

        let admission = Arc::new(AdmissionControl::new(cfg.admission.max_total_listeners, cfg.admission.max_per_frequency));

        Ok(Self { frequencies, post_processor, admission, router })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn admission(&self) -> Arc<AdmissionControl> {
        self.admission.clone()
    }

    /// Admit a listener client to a frequency's decoded audio, enforcing
    /// admission caps atomically before touching the session's client
    /// table (`spec.md` §4.3).
    pub async fn admit_listener(
        &self,
        frequency_id: FrequencyId,
        client_id: &str,
    ) -> Result<ClientReader, OrchestratorError> {
        let handle = self
            .frequencies
            .get(&frequency_id)
            .ok_or(OrchestratorError::UnknownFrequency(frequency_id))?;
        self.admission.try_admit(frequency_id, client_id)?;
        match handle.session.add_client(client_id.to_owned()).await {
            Ok(reader) => Ok(reader),
            Err(e) => {
                self.admission.release(frequency_id, client_id);
                Err(e.into())
            }
        }
    }

    pub async fn remove_listener(&self, frequency_id: FrequencyId, client_id: &str) {
        if let Some(handle) = self.frequencies.get(&frequency_id) {
            handle.session.remove_client(client_id).await;
        }
        self.admission.release(frequency_id, client_id);
    }

    /// Coordinated shutdown (`spec.md` §4.9): C6 first so the in-flight
    /// batch drains, then every C5, then every C3 — each step bounded by
    /// [`SHUTDOWN_TIMEOUT`]; a step that overruns is abandoned rather than
    /// blocking the rest of the sequence. Idempotent by construction: it
    /// consumes `self`, so it can only run once.
    pub async fn stop(self) {
        if let Some(pp) = self.post_processor {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, pp.stop()).await.is_err() {
                warn!("post-processor did not stop within the shutdown deadline");
            }
        }

        let handles: Vec<FrequencyHandle> = self.frequencies.into_values().collect();
        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(transcription) = handle.transcription {
                if tokio::time::timeout(SHUTDOWN_TIMEOUT, transcription.stop()).await.is_err() {
                    warn!("transcription processor did not stop within the shutdown deadline");
                }
            }
            sessions.push(handle.session);
        }
        for session in sessions {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, session.stop()).await.is_err() {
                warn!("stream session did not stop within the shutdown deadline");
            }
        }
        info!("orchestrator shutdown complete");
    }
}

async fn start_frequency(
    freq: &crate::config::FrequencyConfig,
    cfg: &AtcServerConfig,
    store: Arc<dyn TranscriptionStore>,
    publisher: Publisher,
) -> Result<FrequencyHandle, OrchestratorError> {
    let decoder_cfg = DecoderConfig {
        decoder_path: cfg.decoder.path.clone(),
        source_url: freq.url.clone(),
        sample_rate: cfg.decoder.sample_rate,
        channels: cfg.decoder.channels,
        reconnect_delay: Duration::from_secs(cfg.decoder.reconnect_delay_secs),
        connect_timeout: Duration::from_secs(cfg.decoder.timeout_secs),
    };
    let session = StreamSession::start(decoder_cfg);
    info!(frequency = %freq.name, id = %freq.id, "stream session started");

    let transcription = if freq.transcribe && !cfg.stt.api_key.is_empty() {
        let reader = session.tap(format!("transcribe-{}", freq.id))?;
        let provider: Arc<dyn RealtimeProvider> = Arc::new(build_realtime_provider(&cfg.stt));
        let chunk_cfg = ChunkConfig {
            sample_rate: cfg.decoder.sample_rate,
            channels: cfg.decoder.channels,
            chunk_ms: cfg.stt.chunk_ms,
        };
        let processor = TranscriptionProcessor::start(
            freq.id,
            chunk_cfg,
            reader,
            provider,
            cfg.stt.prompt.clone(),
            store,
            publisher,
        )
        .await?;
        info!(frequency = %freq.name, "transcription processor started");
        Some(processor)
    } else {
        None
    };

    Ok(FrequencyHandle { session, transcription })
}

async fn start_post_processor(
    cfg: &AtcServerConfig,
    store: Arc<dyn Store>,
    publisher: Publisher,
) -> Result<PostProcessor, OrchestratorError> {
    let prompt = std::fs::read_to_string(&cfg.post.system_prompt_path).map_err(OrchestratorError::SystemPrompt)?;
    let renderer = Arc::new(StaticPromptRenderer(prompt));
    let chat = Arc::new(HttpChatProvider::new(HttpChatConfig {
        chat_url: format!("{}/v1/chat/completions", cfg.stt.base_url.trim_end_matches('/')),
        api_key: cfg.stt.api_key.clone(),
        model: cfg.post.model.clone(),
    }));
    let pp_cfg = PostProcessorConfig {
        interval: Duration::from_secs(cfg.post.interval_secs),
        batch_size: cfg.post.batch_size,
        context_count: cfg.post.context_count,
    };
    info!("post-processor started");
    Ok(PostProcessor::start(pp_cfg, store, chat, renderer, publisher))
}

fn build_realtime_provider(stt: &crate::config::SttSettings) -> WsRealtimeProvider {
    let (sessions_url, websocket_url) = derive_realtime_urls(&stt.base_url, &stt.model);
    WsRealtimeProvider::new(WsRealtimeConfig {
        sessions_url,
        websocket_url,
        api_key: stt.api_key.clone(),
        model: stt.model.clone(),
        turn_detection: Some(TurnDetectionConfig {
            kind: stt.turn_detection.kind.clone(),
            prefix_padding_ms: stt.turn_detection.prefix_padding_ms,
            silence_duration_ms: stt.turn_detection.silence_duration_ms,
            vad_threshold: stt.turn_detection.vad_threshold,
        }),
    })
}

fn derive_realtime_urls(base_url: &str, model: &str) -> (String, String) {
    let base = base_url.trim_end_matches('/');
    let sessions_url = format!("{base}/v1/realtime/sessions");
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    };
    let websocket_url = format!("{ws_base}/v1/realtime?model={model}");
    (sessions_url, websocket_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_realtime_urls_converts_https_to_wss() {
        let (sessions, ws) = derive_realtime_urls("https://api.openai.com", "gpt-4o-realtime-preview");
        assert_eq!(sessions, "https://api.openai.com/v1/realtime/sessions");
        assert_eq!(ws, "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview");
    }

    #[test]
    fn derive_realtime_urls_converts_http_to_ws() {
        let (_, ws) = derive_realtime_urls("http://localhost:8080/", "test-model");
        assert_eq!(ws, "ws://localhost:8080/v1/realtime?model=test-model");
    }
}
