//! OpenAI `/v1/audio/speech` provider.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use callbridge_core::error::{Stage, TurnError};

use crate::{SpeechAsset, SpeechSynthesizer};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "tts-1";
const DEFAULT_VOICE: &str = "alloy";

pub struct OpenAiSpeech {
    pub base_url: String,
    api_key: String,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl OpenAiSpeech {
    pub fn new(
        api_key: String,
        base_url: Option<&str>,
        model: Option<String>,
        voice: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.into()),
            voice: voice.unwrap_or_else(|| DEFAULT_VOICE.into()),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    fn name(&self) -> &str {
        "openai"
    }

    async fn synthesize(&self, text: &str) -> Result<SpeechAsset, TurnError> {
        let url = format!("{}/v1/audio/speech", self.base_url);
        debug!(model = %self.model, voice = %self.voice, chars = text.len(), "Requesting speech");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "voice": self.voice,
                "input": text,
                "response_format": "mp3",
            }))
            .send()
            .await
            .map_err(|e| TurnError::upstream(Stage::Synthesis, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TurnError::upstream(
                Stage::Synthesis,
                format!("OpenAI API error ({status}): {body}"),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TurnError::upstream(Stage::Synthesis, e.to_string()))?;
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
    fn test_defaults_and_base_url_trim() {
        let tts = OpenAiSpeech::new("k".into(), Some("http://localhost:9000/"), None, None);
        assert_eq!(tts.base_url, "http://localhost:9000");
        assert_eq!(tts.model, "tts-1");
        assert_eq!(tts.voice, "alloy");
    }
}
