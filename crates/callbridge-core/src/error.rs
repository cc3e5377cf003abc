use std::fmt;

use thiserror::Error;

/// Process-level errors: startup, config, and I/O.
#[derive(Debug, Error)]
pub enum CallbridgeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CallbridgeError>;

/// Pipeline stage an upstream failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Materialize,
    Transcription,
    Dialogue,
    Synthesis,
    Playback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Materialize => "materialize",
            Self::Transcription => "transcription",
            Self::Dialogue => "dialogue",
            Self::Synthesis => "synthesis",
            Self::Playback => "playback",
        };
        f.write_str(s)
    }
}

/// Why a transcript was not forwarded to the dialogue engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    PunctuationOnly,
    Duplicate,
    Echo,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::PunctuationOnly => "punctuation_only",
            Self::Duplicate => "duplicate",
            Self::Echo => "echo",
        };
        f.write_str(s)
    }
}

/// Turn-scoped failures. None of these terminate a call session; the turn is
/// abandoned and the session goes back to listening.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Malformed stream event: {0}")]
    Transport(String),

    #[error("{what} too large ({size} bytes, limit {limit})")]
    Oversize {
        what: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("Dialogue turn did not complete after {attempts} polls")]
    UpstreamTimeout { attempts: u32 },

    #[error("{stage} failed: {message}")]
    UpstreamFailure { stage: Stage, message: String },

    #[error("Transcript rejected: {0}")]
    ValidationRejected(Rejection),
}

impl TurnError {
    pub fn upstream(stage: Stage, message: impl Into<String>) -> Self {
        Self::UpstreamFailure {
            stage,
            message: message.into(),
        }
    }

    /// Reject a payload whose size exceeds `limit`.
    pub fn check_size(what: &'static str, size: usize, limit: usize) -> std::result::Result<(), Self> {
        if size > limit {
            return Err(Self::Oversize { what, size, limit });
        }
        Ok(())
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Oversize { .. } => "oversize",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamFailure { .. } => "upstream_failure",
            Self::ValidationRejected(_) => "validation_rejected",
        }
    }
}
