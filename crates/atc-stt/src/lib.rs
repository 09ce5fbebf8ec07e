//! Provider-agnostic transcription adapter (`spec.md` §4.4, component C4).

mod chat;
mod error;
mod provider;
mod reconnect;
mod session;
mod ws_realtime;

pub use chat::{HttpChatConfig, HttpChatProvider};
pub use error::{ErrorClass, SttError};
pub use provider::{ChatProvider, Connection, RealtimeProvider};
pub use reconnect::ReconnectState;
pub use session::RealtimeSession;
pub use ws_realtime::{TurnDetectionConfig, WsRealtimeConfig, WsRealtimeProvider};
