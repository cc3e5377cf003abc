//! Media-stream wire protocol.
//!
//! The telephony platform opens one WebSocket per call and sends JSON text
//! frames tagged by `event`: `connected`, `start`, `media`, `stop`, and the
//! asynchronous `playback_ended`. Unknown events decode to
//! [`StreamEvent::Unknown`] rather than failing.

use serde::{Deserialize, Serialize};

use crate::error::TurnError;

/// Sample encoding of inbound media payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoding {
    /// G.711 μ-law.
    #[default]
    #[serde(rename = "PCMU")]
    Pcmu,
    /// G.711 A-law.
    #[serde(rename = "PCMA")]
    Pcma,
    /// 16-bit little-endian linear PCM.
    #[serde(rename = "L16")]
    L16,
}

impl AudioEncoding {
    /// Parse a platform encoding name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PCMU" | "MULAW" | "ULAW" => Some(Self::Pcmu),
            "PCMA" | "ALAW" => Some(Self::Pcma),
            "L16" | "LINEAR16" | "PCM16" => Some(Self::L16),
            _ => None,
        }
    }

    /// Bytes per sample on the wire.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Pcmu | Self::Pcma => 1,
            Self::L16 => 2,
        }
    }
}

/// Negotiated media format for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self {
            encoding: AudioEncoding::Pcmu,
            sample_rate: 8000,
            channels: 1,
        }
    }
}

/// Stream start metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStart {
    /// Call identity used to correlate webhooks and control-plane actions.
    pub call_id: String,
    pub stream_id: Option<String>,
    pub format: MediaFormat,
}

/// One decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected,
    Start(StreamStart),
    Media {
        /// Base64-encoded audio frame.
        payload: String,
        track: Option<String>,
    },
    Stop,
    PlaybackEnded {
        playback_id: String,
    },
    Dtmf {
        digit: String,
    },
    Unknown(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WireEvent {
    Connected {},
    Start {
        start: WireStart,
        #[serde(default)]
        stream_id: Option<String>,
    },
    Media {
        media: WireMedia,
    },
    Stop {},
    PlaybackEnded {
        playback_id: String,
    },
    Dtmf {
        dtmf: WireDtmf,
    },
}

#[derive(Debug, Deserialize)]
struct WireStart {
    #[serde(alias = "call_sid", alias = "callSid")]
    call_control_id: String,
    #[serde(default)]
    media_format: Option<WireMediaFormat>,
}

#[derive(Debug, Deserialize)]
struct WireMediaFormat {
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    channels: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct WireMedia {
    payload: String,
    #[serde(default)]
    track: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDtmf {
    digit: String,
}

const KNOWN_EVENTS: &[&str] = &["connected", "start", "media", "stop", "playback_ended", "dtmf"];

impl StreamEvent {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, TurnError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| TurnError::Transport(e.to_string()))?;

        let name = value
            .get("event")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| TurnError::Transport("missing 'event' field".into()))?;

        if !KNOWN_EVENTS.contains(&name.as_str()) {
            return Ok(Self::Unknown(name));
        }

        let wire: WireEvent = serde_json::from_value(value)
            .map_err(|e| TurnError::Transport(format!("{name}: {e}")))?;

        Ok(match wire {
            WireEvent::Connected {} => Self::Connected,
            WireEvent::Start { start, stream_id } => {
                let mut format = MediaFormat::default();
                if let Some(wf) = start.media_format {
                    if let Some(enc) = wf.encoding.as_deref() {
                        format.encoding = AudioEncoding::from_name(enc).ok_or_else(|| {
                            TurnError::Transport(format!("unsupported encoding '{enc}'"))
                        })?;
                    }
                    if let Some(rate) = wf.sample_rate {
                        format.sample_rate = rate;
                    }
                    if let Some(ch) = wf.channels {
                        format.channels = ch;
                    }
                }
                Self::Start(StreamStart {
                    call_id: start.call_control_id,
                    stream_id,
                    format,
                })
            }
            WireEvent::Media { media } => Self::Media {
                payload: media.payload,
                track: media.track,
            },
            WireEvent::Stop {} => Self::Stop,
            WireEvent::PlaybackEnded { playback_id } => Self::PlaybackEnded { playback_id },
            WireEvent::Dtmf { dtmf } => Self::Dtmf { digit: dtmf.digit },
        })
    }

    /// Event name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::Start(_) => "start",
            Self::Media { .. } => "media",
            Self::Stop => "stop",
            Self::PlaybackEnded { .. } => "playback_ended",
            Self::Dtmf { .. } => "dtmf",
            Self::Unknown(name) => name,
        }
    }
}
