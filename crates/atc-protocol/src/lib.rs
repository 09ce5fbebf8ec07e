// atc-protocol: Wire and event types shared across the streaming pipeline.
//
// Two independent vocabularies live here:
//   - the STT provider's internal event vocabulary (`SttEvent`), which
//     concrete adapters in `atc-stt` translate their native wire format
//     into and out of;
//   - the event-bus vocabulary (`BusMessage`/`ClientMessage`), which is
//     the actual JSON sent over the public websocket.
//
// Both use `#[serde(tag = "type", ...)]` discriminated unions, matching
// the `#[serde(tag = "kind")]` convention used for `WsMessage` upstream.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Domain identifiers
// ---------------------------------------------------------------------------

pub type FrequencyId = Uuid;
pub type TranscriptionId = Uuid;
pub type ClearanceId = Uuid;

// ---------------------------------------------------------------------------
// STT provider internal event vocabulary (C4)
// ---------------------------------------------------------------------------

/// Outbound frames the adapter sends to the provider connection.
///
/// Every concrete provider implementation is responsible for translating
/// these into its own native wire format; nothing above `atc-stt` ever
/// constructs a provider-specific frame directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum SttOutboundFrame {
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "session.update")]
    SessionUpdate { instructions: String },
}

/// Inbound frames the adapter receives from the provider connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SttInboundFrame {
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta { delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta { delta: String },
    #[serde(rename = "response.text.done")]
    ResponseTextDone { text: String },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// Normalized event the processor (C5) consumes, after adapter translation.
///
/// This is never serialized on the wire — it's the internal currency
/// between `atc-stt` and `atc-transcribe`.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionEvent {
    Delta { text: String },
    Completed { text: String },
    Error { code: String, message: String },
}

// ---------------------------------------------------------------------------
// Speaker / clearance vocabulary (C6 output shape)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpeakerType {
    Atc,
    Pilot,
}

/// One clearance extracted from an ATC utterance by the post-processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearanceJson {
    pub callsign: String,
    #[serde(rename = "type")]
    pub clearance_type: String,
    pub text: String,
    #[serde(default)]
    pub runway: Option<String>,
}

// ---------------------------------------------------------------------------
// Event bus: server -> client (C7)
// ---------------------------------------------------------------------------

/// Server-to-client broadcast envelope.
///
/// Serializes as `{"type": "...", "data": {...}}`, matching
/// `spec.md` §6's wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BusMessage {
    Transcription(TranscriptionPayload),
    TranscriptionUpdate(TranscriptionPayload),
    ClearanceIssued(ClearancePayload),
    AircraftAdded(AircraftPayload),
    AircraftUpdate(AircraftPayload),
    AircraftRemoved(AircraftPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionPayload {
    pub id: TranscriptionId,
    pub frequency_id: FrequencyId,
    pub text: String,
    /// RFC3339, second precision.
    pub timestamp: String,
    pub is_complete: bool,
    pub is_processed: bool,
    #[serde(default)]
    pub content_processed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearancePayload {
    pub id: ClearanceId,
    pub transcription_id: TranscriptionId,
    pub callsign: String,
    #[serde(rename = "type")]
    pub clearance_type: String,
    pub text: String,
    #[serde(default)]
    pub runway: Option<String>,
    pub issued_at: String,
}

/// Aircraft snapshot as carried by aircraft-scoped bus messages.
///
/// The aircraft/ADS-B pipeline itself is out of scope (`spec.md` §1); this
/// shape only needs to exist so C7's filter predicate (§4.7) has fields to
/// evaluate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AircraftPayload {
    pub hex: String,
    pub on_ground: bool,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Event bus: client -> server (C7)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    FilterUpdate(ClientFilters),
    AircraftBulkRequest(AircraftBulkRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientFilters {
    #[serde(default)]
    pub show_air: bool,
    #[serde(default)]
    pub show_ground: bool,
    #[serde(default)]
    pub phases: std::collections::HashMap<String, bool>,
    #[serde(default)]
    pub selected_aircraft_hex: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AircraftBulkRequest {
    #[serde(default)]
    pub hexes: Vec<String>,
}
