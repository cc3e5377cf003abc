//! OpenAI-compatible `/v1/chat/completions` backend.
//!
//! Completions are synchronous, so every turn is [`Submission::Ready`]. The
//! remote side keeps no state; the full history is sent with each turn and the
//! session token is a locally minted id used only for log correlation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use callbridge_core::error::{Stage, TurnError};
use callbridge_core::types::HistoryEntry;

use crate::{DialogueBackend, PendingRun, RunPoll, Submission, TurnRequest};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful voice assistant on a phone call. Answer in one or two short spoken sentences.";

pub struct ChatCompletionsBackend {
    pub base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl ChatCompletionsBackend {
    pub fn new(
        api_key: String,
        base_url: Option<&str>,
        model: Option<String>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.into()),
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            client: reqwest::Client::new(),
        }
    }

    fn build_request<'a>(&'a self, history: &'a [HistoryEntry]) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage {
            role: "system",
            content: &self.system_prompt,
        });
        messages.extend(history.iter().map(|entry| ChatMessage {
            role: entry.role.as_str(),
            content: &entry.text,
        }));
        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: 300,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl DialogueBackend for ChatCompletionsBackend {
    fn id(&self) -> &str {
        "chat"
    }

    async fn submit(&self, request: &TurnRequest<'_>) -> Result<Submission, TurnError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request(request.history);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TurnError::upstream(Stage::Dialogue, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(TurnError::upstream(
                Stage::Dialogue,
                format!("OpenAI API error ({status}): {text}"),
            ));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| TurnError::upstream(Stage::Dialogue, format!("bad response body: {e}")))?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let session_token = request
            .session_token
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        debug!(session = %session_token, chars = reply.len(), "Chat completion received");

        Ok(Submission::Ready {
            reply,
            session_token,
        })
    }

    async fn poll(&self, _run: &PendingRun) -> Result<RunPoll, TurnError> {
        Ok(RunPoll::Failed("chat completions have no pending runs".into()))
    }
}
