//! Text-to-speech for assistant replies.
//!
//! Providers implement [`SpeechSynthesizer`]; [`SynthesisClient`] adds reply
//! cleaning and the input/output size limits in front of whichever provider is
//! configured.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use tracing::debug;

use callbridge_core::config::TtsConfig;
use callbridge_core::error::{Stage, TurnError};

pub mod elevenlabs;
pub mod openai;

pub use elevenlabs::ElevenLabsSpeech;
pub use openai::OpenAiSpeech;

/// Synthesized audio, held in memory until playback has fetched it.
#[derive(Debug, Clone)]
pub struct SpeechAsset {
    pub bytes: Bytes,
    pub mime: &'static str,
}

impl SpeechAsset {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A text-to-speech provider.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str) -> Result<SpeechAsset, TurnError>;
}

/// Strip citation markers the assistant attaches to retrieved passages,
/// e.g. `【4:0†source】` or `[†1]`, then collapse whitespace.
pub fn clean_reply_text(text: &str) -> String {
    static CITATIONS: OnceLock<Regex> = OnceLock::new();
    let re = CITATIONS
        .get_or_init(|| Regex::new(r"【[^】]*】|\[\*?†[^\]]*\]").expect("static pattern compiles"));
    let stripped = re.replace_all(text, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Size-checked front for a [`SpeechSynthesizer`].
#[derive(Clone)]
pub struct SynthesisClient {
    inner: Arc<dyn SpeechSynthesizer>,
    max_input_chars: usize,
    max_output_bytes: usize,
}

impl SynthesisClient {
    pub fn new(inner: Arc<dyn SpeechSynthesizer>, max_input_chars: usize, max_output_bytes: usize) -> Self {
        Self {
            inner,
            max_input_chars,
            max_output_bytes,
        }
    }

    pub fn from_config(inner: Arc<dyn SpeechSynthesizer>, config: &TtsConfig) -> Self {
        Self::new(inner, config.max_input_chars, config.max_output_bytes)
    }

    /// Clean `reply` and synthesize it.
    pub async fn synthesize(&self, reply: &str) -> Result<SpeechAsset, TurnError> {
        let text = clean_reply_text(reply);
        if text.is_empty() {
            return Err(TurnError::upstream(Stage::Synthesis, "reply is empty after cleaning"));
        }
        TurnError::check_size("reply", text.chars().count(), self.max_input_chars)?;

        let asset = self.inner.synthesize(&text).await?;
        if asset.is_empty() {
            return Err(TurnError::upstream(Stage::Synthesis, "provider returned no audio"));
        }
        TurnError::check_size("speech", asset.len(), self.max_output_bytes)?;

        debug!(provider = self.inner.name(), bytes = asset.len(), "Reply synthesized");
        Ok(asset)
    }
}

/// Build the configured provider. Returns `None` when no API key resolves.
pub fn synthesizer_from_config(config: &TtsConfig) -> Option<Arc<dyn SpeechSynthesizer>> {
    let api_key = config.resolve_api_key()?;
    match config.provider.as_str() {
        "elevenlabs" => Some(Arc::new(ElevenLabsSpeech::new(
            api_key,
            config.voice.clone(),
            config.model.clone(),
        ))),
        _ => Some(Arc::new(OpenAiSpeech::new(
            api_key,
            None,
            config.model.clone(),
            config.voice.clone(),
        ))),
    }
}
