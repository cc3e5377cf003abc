//! Conversational backends.
//!
//! Each backend implements [`DialogueBackend`]. A turn is submitted once and
//! either completes immediately or yields a [`PendingRun`] that the
//! [`ConversationEngine`] polls under a bounded [`RetryPolicy`].

use std::sync::Arc;

use async_trait::async_trait;

use callbridge_core::config::{AssistantConfig, DialogueBackendKind};
use callbridge_core::error::{CallbridgeError, Result, TurnError};
use callbridge_core::types::HistoryEntry;

#[cfg(feature = "assistants")]
pub mod assistants;
#[cfg(feature = "chat")]
pub mod chat;
pub mod engine;
pub mod retry;

pub use engine::ConversationEngine;
pub use retry::RetryPolicy;

/// One dialogue turn as sent to a backend.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    /// The caller's validated transcript.
    pub text: &'a str,
    /// Remote session token from earlier turns of the same call.
    pub session_token: Option<&'a str>,
    /// Full history, ending with the entry for `text`.
    pub history: &'a [HistoryEntry],
}

/// An asynchronous turn still running on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRun {
    pub session_token: String,
    pub run_id: String,
}

/// Outcome of submitting a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Ready { reply: String, session_token: String },
    Pending(PendingRun),
}

/// Outcome of one poll of a pending turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPoll {
    Ready(String),
    Pending,
    Failed(String),
}

/// A remote conversational service.
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    fn id(&self) -> &str;

    async fn submit(&self, request: &TurnRequest<'_>) -> std::result::Result<Submission, TurnError>;

    async fn poll(&self, run: &PendingRun) -> std::result::Result<RunPoll, TurnError>;
}

/// Build the configured backend.
pub fn backend_from_config(config: &AssistantConfig) -> Result<Arc<dyn DialogueBackend>> {
    let api_key = config
        .resolve_api_key()
        .ok_or_else(|| CallbridgeError::Config("No assistant API key configured".into()))?;

    match config.backend {
        #[cfg(feature = "assistants")]
        DialogueBackendKind::Assistants => {
            let assistant_id = config
                .resolve_assistant_id()
                .ok_or_else(|| CallbridgeError::Config("No assistant_id configured".into()))?;
            Ok(Arc::new(assistants::AssistantsBackend::new(
                api_key,
                assistant_id,
                config.base_url.as_deref(),
            )))
        }
        #[cfg(feature = "chat")]
        DialogueBackendKind::Chat => Ok(Arc::new(chat::ChatCompletionsBackend::new(
            api_key,
            config.base_url.as_deref(),
            config.model.clone(),
            config.system_prompt.clone(),
        ))),
        #[allow(unreachable_patterns)]
        other => Err(CallbridgeError::Config(format!(
            "backend {other:?} is not compiled in"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_config() {
        let config = AssistantConfig {
            backend: DialogueBackendKind::Chat,
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert_eq!(backend_from_config(&config).unwrap().id(), "chat");

        let config = AssistantConfig {
            api_key: Some("sk-test".into()),
            assistant_id: Some("asst_1".into()),
            ..Default::default()
        };
        assert_eq!(backend_from_config(&config).unwrap().id(), "assistants");
    }

    #[test]
    fn test_assistants_backend_needs_id() {
        if std::env::var("ASSISTANT_ID").is_ok() {
            return;
        }
        let config = AssistantConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let err = backend_from_config(&config).err().unwrap();
        assert!(err.to_string().contains("assistant_id"));
    }
}
