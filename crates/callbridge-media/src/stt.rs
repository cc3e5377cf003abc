//! Speech-to-text for materialized utterances.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use callbridge_core::config::TranscriptionConfig;
use callbridge_core::error::{Stage, TurnError};

use crate::asset::AudioAsset;

/// A speech-to-text provider.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, asset: &AudioAsset) -> Result<String, TurnError>;
}

/// Size-checked front for a [`Transcriber`].
#[derive(Clone)]
pub struct TranscriptionClient {
    inner: Arc<dyn Transcriber>,
    max_upload_bytes: usize,
}

impl TranscriptionClient {
    pub fn new(inner: Arc<dyn Transcriber>, max_upload_bytes: usize) -> Self {
        Self {
            inner,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Transcribe one asset. The returned text is trimmed.
    pub async fn transcribe(&self, asset: &AudioAsset) -> Result<String, TurnError> {
        TurnError::check_size("utterance", asset.len(), self.max_upload_bytes)?;
        let text = self.inner.transcribe(asset).await?;
        debug!(provider = self.inner.name(), chars = text.len(), "Transcribed utterance");
        Ok(text.trim().to_string())
    }
}

/// Get the transcription API URL for a given provider.
pub fn provider_url(config: &TranscriptionConfig) -> &'static str {
    match config.provider.as_str() {
        "groq" => "https://api.groq.com/openai/v1/audio/transcriptions",
        _ => "https://api.openai.com/v1/audio/transcriptions",
    }
}

fn default_model(provider: &str) -> &'static str {
    match provider {
        "groq" => "whisper-large-v3-turbo",
        _ => "whisper-1",
    }
}

/// Whisper-compatible multipart transcription endpoint (OpenAI or Groq).
pub struct WhisperTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    pub fn new(api_key: String, url: String, model: String, language: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url,
            api_key,
            model,
            language,
        }
    }

    /// Build from configuration. Returns `None` when no API key resolves.
    pub fn from_config(config: &TranscriptionConfig) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| default_model(&config.provider).to_string());
        Some(Self::new(
            api_key,
            provider_url(config).to_string(),
            model,
            config.language.clone(),
        ))
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, asset: &AudioAsset) -> Result<String, TurnError> {
        let bytes = asset.read().await?;
        debug!(url = %self.url, model = %self.model, bytes = bytes.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(asset.file_name())
            .mime_str(asset.mime())
            .map_err(|e| TurnError::upstream(Stage::Transcription, e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TurnError::upstream(Stage::Transcription, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TurnError::upstream(
                Stage::Transcription,
                format!("API error {status}: {body}"),
            ));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| TurnError::upstream(Stage::Transcription, e.to_string()))?;
        Ok(text.trim().to_string())
    }
}
