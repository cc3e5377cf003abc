//! Telnyx Call Control v2.
//!
//! Every action is `POST /v2/calls/{call_control_id}/actions/{action}` with a
//! bearer key. Playback ids travel in `client_state`, base64 encoded as the
//! platform requires, and come back on `call.playback.*` webhooks.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use callbridge_core::config::TelephonyConfig;

use crate::CallControl;
use crate::webhook::encode_client_state;

const TELNYX_API_BASE: &str = "https://api.telnyx.com/v2";

pub struct TelnyxCallControl {
    pub api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl TelnyxCallControl {
    pub fn new(api_key: String, api_base: Option<&str>) -> Self {
        Self {
            api_base: api_base
                .unwrap_or(TELNYX_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Build from configuration. Returns `None` when no API key resolves.
    pub fn from_config(config: &TelephonyConfig) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        Some(Self::new(api_key, config.api_base.as_deref()))
    }

    fn action_url(&self, call_id: &str, action: &str) -> String {
        format!("{}/calls/{call_id}/actions/{action}", self.api_base)
    }

    async fn action(&self, call_id: &str, action: &str, body: serde_json::Value) -> anyhow::Result<()> {
        let url = self.action_url(call_id, action);
        debug!(call_id, action, "Telnyx action");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telnyx {action} failed ({status}): {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl CallControl for TelnyxCallControl {
    fn id(&self) -> &str {
        "telnyx"
    }

    async fn playback_start(
        &self,
        call_id: &str,
        audio_url: &str,
        playback_id: &str,
    ) -> anyhow::Result<()> {
        self.action(
            call_id,
            "playback_start",
            json!({
                "audio_url": audio_url,
                "client_state": encode_client_state(playback_id),
                "command_id": playback_id,
            }),
        )
        .await?;
        info!(call_id, playback_id, "Playback started");
        Ok(())
    }

    async fn playback_stop(&self, call_id: &str) -> anyhow::Result<()> {
        self.action(call_id, "playback_stop", json!({ "stop": "all" }))
            .await?;
        info!(call_id, "Playback stopped");
        Ok(())
    }

    async fn speak(&self, call_id: &str, text: &str, voice: &str, language: &str) -> anyhow::Result<()> {
        self.action(
            call_id,
            "speak",
            json!({
                "payload": text,
                "voice": voice,
                "language": language,
            }),
        )
        .await
    }

    async fn streaming_start(
        &self,
        call_id: &str,
        stream_url: &str,
        track: &str,
        client_state: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut body = json!({
            "stream_url": stream_url,
            "stream_track": track,
        });
        if let Some(state) = client_state {
            body["client_state"] = json!(state);
        }
        self.action(call_id, "streaming_start", body).await?;
        info!(call_id, stream_url, "Media streaming requested");
        Ok(())
    }
}
