//! Call-control webhook events.
//!
//! The platform posts `{"data": {"event_type": ..., "payload": {...}}}`. Only
//! the fields the bridge acts on are decoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

/// Lifecycle events the bridge distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEventKind {
    Initiated,
    Answered,
    SpeakStarted,
    SpeakEnded,
    PlaybackStarted,
    PlaybackEnded,
    StreamingStarted,
    StreamingStopped,
    Hangup,
    Other(String),
}

impl CallEventKind {
    fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "call.initiated" => Self::Initiated,
            "call.answered" => Self::Answered,
            "call.speak.started" => Self::SpeakStarted,
            "call.speak.ended" => Self::SpeakEnded,
            "call.playback.started" => Self::PlaybackStarted,
            "call.playback.ended" => Self::PlaybackEnded,
            "streaming.started" => Self::StreamingStarted,
            "streaming.stopped" => Self::StreamingStopped,
            "call.hangup" => Self::Hangup,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One decoded webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub kind: CallEventKind,
    pub event_type: String,
    pub call_id: Option<String>,
    /// Raw (still encoded) client state.
    pub client_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    event_type: String,
    #[serde(default)]
    payload: EnvelopePayload,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopePayload {
    #[serde(default)]
    call_control_id: Option<String>,
    #[serde(default)]
    client_state: Option<String>,
}

impl CallEvent {
    pub fn parse(body: &serde_json::Value) -> anyhow::Result<Self> {
        let envelope = Envelope::deserialize(body)?;
        Ok(Self {
            kind: CallEventKind::from_event_type(&envelope.data.event_type),
            event_type: envelope.data.event_type,
            call_id: envelope.data.payload.call_control_id,
            client_state: envelope.data.payload.client_state,
        })
    }

    /// The playback id carried in `client_state`, if it decodes.
    pub fn playback_id(&self) -> Option<String> {
        self.client_state.as_deref().and_then(decode_client_state)
    }
}

pub fn encode_client_state(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

pub fn decode_client_state(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}
