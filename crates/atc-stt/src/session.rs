//! The stateful wrapper the stream processor (C5) actually drives:
//! transparent reconnect-with-backoff and proactive session refresh sit
//! here so C5 only ever sees `send_audio`/`next_event` succeed or a fatal
//! error (`spec.md` §4.4/§4.5 boundary).

use std::sync::Arc;
use std::time::{Duration, Instant};

use atc_core::SttSession;
use atc_protocol::{SttOutboundFrame, TranscriptionEvent};
use tracing::{info, warn};

use crate::error::{ErrorClass, SttError};
use crate::provider::{Connection, RealtimeProvider};
use crate::reconnect::ReconnectState;

const SESSION_REFRESH_AGE: Duration = Duration::from_secs(25 * 60);

pub struct RealtimeSession {
    provider: Arc<dyn RealtimeProvider>,
    session: SttSession,
    conn: Box<dyn Connection>,
    started_at: Instant,
    reconnect: ReconnectState,
    system_prompt: String,
}

impl RealtimeSession {
    pub async fn create(
        provider: Arc<dyn RealtimeProvider>,
        system_prompt: impl Into<String>,
    ) -> Result<Self, SttError> {
        let system_prompt = system_prompt.into();
        let session = provider.create_session(&system_prompt).await?;
        let conn = provider.connect(&session).await?;
        Ok(Self {
            provider,
            session,
            conn,
            started_at: Instant::now(),
            reconnect: ReconnectState::new(),
            system_prompt,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub async fn send_audio_chunk(&mut self, pcm_b64: String) -> Result<(), SttError> {
        self.maybe_refresh().await?;
        loop {
            match self
                .conn
                .send(SttOutboundFrame::InputAudioBufferAppend { audio: pcm_b64.clone() })
                .await
            {
                Ok(()) => {
                    self.reconnect.record_success();
                    return Ok(());
                }
                Err(e) => {
                    self.recover_or_propagate(e).await?;
                }
            }
        }
    }

    /// Await the next transcription event, transparently reconnecting on a
    /// reconnectable transport error (`spec.md` §4.4 reconnect policy).
    pub async fn next_event(&mut self) -> Result<TranscriptionEvent, SttError> {
        loop {
            self.maybe_refresh().await?;
            match self.conn.read().await {
                Ok(event) => {
                    self.reconnect.record_success();
                    return Ok(event);
                }
                Err(e) => {
                    self.recover_or_propagate(e).await?;
                }
            }
        }
    }

    async fn recover_or_propagate(&mut self, e: SttError) -> Result<(), SttError> {
        if e.classify() != ErrorClass::Reconnectable {
            return Err(e);
        }
        let delay = self.reconnect.record_failure().map_err(SttError::Fatal)?;
        warn!(error = %e, delay_ms = delay.as_millis(), "stt transport error, reconnecting");
        tokio::time::sleep(delay).await;
        self.conn = self.provider.connect(&self.session).await?;
        Ok(())
    }

    async fn maybe_refresh(&mut self) -> Result<(), SttError> {
        if self.started_at.elapsed() < SESSION_REFRESH_AGE {
            return Ok(());
        }
        info!(session_id = %self.session.id, "proactively refreshing stt session before expiry");
        let new_session = self.provider.create_session(&self.system_prompt).await?;
        let new_conn = self.provider.connect(&new_session).await?;
        let old_session = std::mem::replace(&mut self.session, new_session);
        self.conn = new_conn;
        self.started_at = Instant::now();
        let _ = self.provider.end_session(&old_session).await;
        Ok(())
    }
}
