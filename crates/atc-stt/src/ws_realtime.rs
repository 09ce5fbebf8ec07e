//! A websocket-based `RealtimeProvider`, grounded on the teacher's
//! `UplinkSession`: a REST call to create a session, then a websocket
//! connection authenticated with a bearer token, driven by the same
//! connect/send/recv shape.

use std::time::Duration;

use async_trait::async_trait;
use atc_core::SttSession;
use atc_protocol::{SttInboundFrame, SttOutboundFrame, TranscriptionEvent};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::SttError;
use crate::provider::{Connection, RealtimeProvider};

/// An idle gap with no further deltas after which a provider that never
/// emits an explicit completion is treated as having finished an utterance
/// (`spec.md` §4.4).
const IDLE_FINALIZE_GAP: Duration = Duration::from_millis(650);

/// Server-side voice-activity detection parameters passed through to the
/// provider's session-create call (`spec.md` §6 `stt.turnDetection`).
#[derive(Debug, Clone)]
pub struct TurnDetectionConfig {
    pub kind: String,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub vad_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct WsRealtimeConfig {
    pub sessions_url: String,
    pub websocket_url: String,
    pub api_key: String,
    pub model: String,
    pub turn_detection: Option<TurnDetectionConfig>,
}

pub struct WsRealtimeProvider {
    http: reqwest::Client,
    cfg: WsRealtimeConfig,
}

impl WsRealtimeProvider {
    pub fn new(cfg: WsRealtimeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }
}

#[async_trait]
impl RealtimeProvider for WsRealtimeProvider {
    async fn create_session(&self, system_prompt: &str) -> Result<SttSession, SttError> {
        let mut body = serde_json::json!({
            "model": self.cfg.model,
            "instructions": system_prompt,
        });
        if let Some(td) = &self.cfg.turn_detection {
            body["turn_detection"] = serde_json::json!({
                "type": td.kind,
                "prefix_padding_ms": td.prefix_padding_ms,
                "silence_duration_ms": td.silence_duration_ms,
                "threshold": td.vad_threshold,
            });
        }
        let resp = self
            .http
            .post(&self.cfg.sessions_url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SttError::Connect(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SttError::Connect(format!(
                "session create failed: {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SttError::Serialization(e.to_string()))?;

        let id = body["id"]
            .as_str()
            .ok_or_else(|| SttError::Protocol("session response missing id".to_owned()))?
            .to_owned();
        let client_secret = body["client_secret"]["value"].as_str().map(str::to_owned);
        let expires_at = chrono::Utc::now() + chrono::Duration::minutes(30);

        Ok(SttSession {
            id,
            provider_id: self.cfg.model.clone(),
            created_at: chrono::Utc::now(),
            expires_at,
            active: true,
            config: body,
            system_prompt: system_prompt.to_owned(),
            client_secret,
        })
    }

    async fn connect(&self, session: &SttSession) -> Result<Box<dyn Connection>, SttError> {
        let token = session
            .client_secret
            .clone()
            .unwrap_or_else(|| self.cfg.api_key.clone());
        let mut request = self
            .cfg
            .websocket_url
            .clone()
            .into_client_request()
            .map_err(|e| SttError::Connect(format!("invalid url: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {token}")
                .parse()
                .map_err(|e| SttError::Connect(format!("invalid auth header: {e}")))?,
        );

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SttError::Connect(e.to_string()))?;

        let mut conn = WsConnection {
            ws,
            pending_delta: None,
        };
        conn.send(SttOutboundFrame::SessionUpdate {
            instructions: session.system_prompt.clone(),
        })
        .await?;

        Ok(Box::new(conn))
    }

    async fn end_session(&self, _session: &SttSession) -> Result<(), SttError> {
        Ok(())
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct WsConnection {
    ws: WsStream,
    /// Text accumulated from deltas since the last completion, used to
    /// synthesize a completion if the provider goes idle without one.
    pending_delta: Option<String>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: SttOutboundFrame) -> Result<(), SttError> {
        let json =
            serde_json::to_string(&frame).map_err(|e| SttError::Serialization(e.to_string()))?;
        self.ws
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SttError::Transport(e.to_string()))
    }

    async fn read(&mut self) -> Result<TranscriptionEvent, SttError> {
        loop {
            let wait = if self.pending_delta.is_some() {
                IDLE_FINALIZE_GAP
            } else {
                Duration::from_secs(3600)
            };

            match tokio::time::timeout(wait, self.recv_frame()).await {
                Ok(Ok(SttInboundFrame::TranscriptionDelta { delta })) => {
                    self.pending_delta.get_or_insert_with(String::new).push_str(&delta);
                    return Ok(TranscriptionEvent::Delta { text: delta });
                }
                Ok(Ok(SttInboundFrame::TranscriptionCompleted { transcript })) => {
                    self.pending_delta = None;
                    return Ok(TranscriptionEvent::Completed { text: transcript });
                }
                Ok(Ok(SttInboundFrame::Error { code, message })) => {
                    return Ok(TranscriptionEvent::Error { code, message });
                }
                Ok(Ok(_other)) => continue,
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => {
                    if let Some(text) = self.pending_delta.take() {
                        return Ok(TranscriptionEvent::Completed { text });
                    }
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), SttError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| SttError::Transport(e.to_string()))
    }
}

impl WsConnection {
    async fn recv_frame(&mut self) -> Result<SttInboundFrame, SttError> {
        loop {
            match self.ws.next().await {
                None => return Err(SttError::Disconnected),
                Some(Err(e)) => return Err(SttError::Transport(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| SttError::Protocol(format!("bad frame json: {e}")));
                }
                Some(Ok(Message::Close(_))) => return Err(SttError::Disconnected),
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
            }
        }
    }
}
