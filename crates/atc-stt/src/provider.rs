use async_trait::async_trait;
use atc_core::SttSession;
use atc_protocol::{SttOutboundFrame, TranscriptionEvent};

use crate::error::SttError;

/// One bidirectional message channel to a connected STT/Realtime session
/// (`spec.md` §4.4's Connection contract). `send`/`read` on the same
/// connection are not called concurrently by anything above this crate —
/// implementations serialize internally only to protect against the
/// adapter's own reconnect swap.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: SttOutboundFrame) -> Result<(), SttError>;
    async fn read(&mut self) -> Result<TranscriptionEvent, SttError>;
    async fn close(&mut self) -> Result<(), SttError>;
}

/// Speech-in/text-out streaming sessions: the Realtime and
/// Transcription-only sub-contracts share this shape (`spec.md` §4.4).
#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    async fn create_session(&self, system_prompt: &str) -> Result<SttSession, SttError>;
    async fn connect(&self, session: &SttSession) -> Result<Box<dyn Connection>, SttError>;
    async fn end_session(&self, session: &SttSession) -> Result<(), SttError>;

    fn validate_session(&self, session: &SttSession) -> bool {
        session.is_usable()
    }
}

/// Messages-in/text-out, used by the post-processor (C6).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat_completion(
        &self,
        system_prompt: &str,
        user_message: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, SttError>;
}
