//! OpenAI Assistants API (v2) backend.
//!
//! The session token is the thread id. A turn posts the caller's message to
//! the thread and starts a run; the run is then polled until it reaches a
//! terminal status, and the newest assistant message is the reply.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};

use callbridge_core::error::{Stage, TurnError};

use crate::{DialogueBackend, PendingRun, RunPoll, Submission, TurnRequest};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct AssistantsBackend {
    pub base_url: String,
    api_key: String,
    assistant_id: String,
    client: reqwest::Client,
}

impl AssistantsBackend {
    pub fn new(api_key: String, assistant_id: String, base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            assistant_id,
            client: reqwest::Client::new(),
        }
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TurnError> {
        let resp = request
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .await
            .map_err(|e| TurnError::upstream(Stage::Dialogue, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TurnError::upstream(
                Stage::Dialogue,
                format!("Assistants API error ({status}): {body}"),
            ));
        }

        resp.json::<T>()
            .await
            .map_err(|e| TurnError::upstream(Stage::Dialogue, format!("bad response body: {e}")))
    }

    async fn create_thread(&self) -> Result<String, TurnError> {
        let url = format!("{}/v1/threads", self.base_url);
        let thread: IdObject = self.send(self.client.post(url).json(&json!({}))).await?;
        debug!(thread_id = %thread.id, "Created thread");
        Ok(thread.id)
    }

    async fn latest_reply(&self, thread_id: &str) -> Result<Option<String>, TurnError> {
        let url = format!(
            "{}/v1/threads/{thread_id}/messages?order=desc&limit=10",
            self.base_url
        );
        let list: MessageList = self.send(self.client.get(url)).await?;
        Ok(list.first_assistant_text())
    }
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

impl MessageList {
    /// Text of the newest assistant message (the list is newest first).
    fn first_assistant_text(&self) -> Option<String> {
        self.data
            .iter()
            .find(|m| m.role == "assistant")
            .and_then(|m| m.content.iter().find_map(|c| c.text.as_ref()))
            .map(|t| t.value.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

impl RunObject {
    fn classify(&self) -> RunStatus {
        match self.status.as_str() {
            "completed" => RunStatus::Completed,
            "queued" | "in_progress" | "cancelling" => RunStatus::Running,
            other => {
                let detail = self
                    .last_error
                    .as_ref()
                    .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
                    .unwrap_or_default();
                if detail.is_empty() {
                    RunStatus::Failed(format!("run {other}"))
                } else {
                    RunStatus::Failed(format!("run {other}: {detail}"))
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum RunStatus {
    Completed,
    Running,
    Failed(String),
}

#[async_trait]
impl DialogueBackend for AssistantsBackend {
    fn id(&self) -> &str {
        "assistants"
    }

    async fn submit(&self, request: &TurnRequest<'_>) -> Result<Submission, TurnError> {
        let thread_id = match request.session_token {
            Some(token) => token.to_string(),
            None => self.create_thread().await?,
        };

        let url = format!("{}/v1/threads/{thread_id}/messages", self.base_url);
        let _: IdObject = self
            .send(
                self.client
                    .post(url)
                    .json(&json!({ "role": "user", "content": request.text })),
            )
            .await?;

        let url = format!("{}/v1/threads/{thread_id}/runs", self.base_url);
        let run: RunObject = self
            .send(
                self.client
                    .post(url)
                    .json(&json!({ "assistant_id": self.assistant_id })),
            )
            .await?;
        debug!(thread_id = %thread_id, run_id = %run.id, status = %run.status, "Started run");

        Ok(Submission::Pending(PendingRun {
            session_token: thread_id,
            run_id: run.id,
        }))
    }

    async fn poll(&self, run: &PendingRun) -> Result<RunPoll, TurnError> {
        let url = format!(
            "{}/v1/threads/{}/runs/{}",
            self.base_url, run.session_token, run.run_id
        );
        let status: RunObject = self.send(self.client.get(url)).await?;
        trace!(run_id = %run.run_id, status = %status.status, "Polled run");

        match status.classify() {
            RunStatus::Running => Ok(RunPoll::Pending),
            RunStatus::Failed(reason) => Ok(RunPoll::Failed(reason)),
            RunStatus::Completed => match self.latest_reply(&run.session_token).await? {
                Some(reply) => Ok(RunPoll::Ready(reply)),
                None => Ok(RunPoll::Failed("run completed without assistant text".into())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: &str, last_error: Option<&str>) -> RunObject {
        RunObject {
            id: "run_1".into(),
            status: status.into(),
            last_error: last_error.map(|m| RunError {
                code: None,
                message: Some(m.into()),
            }),
        }
    }

    #[test]
    fn test_run_status_classification() {
        assert_eq!(run("completed", None).classify(), RunStatus::Completed);
        assert_eq!(run("queued", None).classify(), RunStatus::Running);
        assert_eq!(run("in_progress", None).classify(), RunStatus::Running);
        assert_eq!(
            run("failed", Some("Rate limit reached")).classify(),
            RunStatus::Failed("run failed: Rate limit reached".into())
        );
        assert_eq!(
            run("expired", None).classify(),
            RunStatus::Failed("run expired".into())
        );
    }

    #[test]
    fn test_message_list_picks_newest_assistant_text() {
        let raw = r#"{
            "object": "list",
            "data": [
                {"id": "m3", "role": "assistant", "content": [
                    {"type": "text", "text": {"value": "  We open at nine. ", "annotations": []}}
                ]},
                {"id": "m2", "role": "user", "content": [
                    {"type": "text", "text": {"value": "When do you open?", "annotations": []}}
                ]},
                {"id": "m1", "role": "assistant", "content": [
                    {"type": "text", "text": {"value": "Hello!", "annotations": []}}
                ]}
            ]
        }"#;
        let list: MessageList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.first_assistant_text().as_deref(), Some("We open at nine."));
    }

    #[test]
    fn test_message_list_without_assistant_text() {
        let raw = r#"{"data": [{"role": "user", "content": []}]}"#;
        let list: MessageList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.first_assistant_text(), None);
    }

    #[test]
    fn test_base_url_trimmed() {
        let backend = AssistantsBackend::new("k".into(), "asst".into(), Some("http://localhost:1/"));
        assert_eq!(backend.base_url, "http://localhost:1");
    }
}
