//! ElevenLabs text-to-speech provider.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use callbridge_core::error::{Stage, TurnError};

use crate::{SpeechAsset, SpeechSynthesizer};

const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM"; // ElevenLabs "Rachel"
const DEFAULT_MODEL: &str = "eleven_turbo_v2";
const OUTPUT_FORMAT: &str = "mp3_44100_128";

pub struct ElevenLabsSpeech {
    api_key: String,
    voice_id: String,
    model_id: String,
    client: reqwest::Client,
}

impl ElevenLabsSpeech {
    pub fn new(api_key: String, voice_id: Option<String>, model_id: Option<String>) -> Self {
        Self {
            api_key,
            voice_id: voice_id.unwrap_or_else(|| DEFAULT_VOICE_ID.into()),
            model_id: model_id.unwrap_or_else(|| DEFAULT_MODEL.into()),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn url(&self) -> String {
        format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}/stream?output_format={OUTPUT_FORMAT}",
            self.voice_id
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSpeech {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> Result<SpeechAsset, TurnError> {
        let resp = self
            .client
            .post(self.url())
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&json!({
                "text": text,
                "model_id": self.model_id,
                "voice_settings": {
                    "stability": 0.5,
                    "similarity_boost": 0.75
                }
            }))
            .send()
            .await
            .map_err(|e| TurnError::upstream(Stage::Synthesis, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TurnError::upstream(
                Stage::Synthesis,
                format!("ElevenLabs API error ({status}): {body}"),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TurnError::upstream(Stage::Synthesis, e.to_string()))?;

        info!(
            size_kb = bytes.len() / 1024,
            voice = %self.voice_id,
            model = %self.model_id,
            "TTS audio generated"
        );

        Ok(SpeechAsset {
            bytes,
            mime: "audio/mpeg",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_uses_voice() {
        let tts = ElevenLabsSpeech::new("k".into(), Some("voice-1".into()), None);
        assert!(tts.url().contains("/text-to-speech/voice-1/stream"));
        assert!(tts.url().ends_with("mp3_44100_128"));
        assert_eq!(tts.model_id, DEFAULT_MODEL);
    }
}
