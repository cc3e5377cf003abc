//! Backend integration tests: real API calls.
//!
//! These tests are skipped when the corresponding env vars are not set.
//! Run with: `cargo test -p callbridge-providers --test integration`

use std::sync::Arc;
use std::time::Duration;

use callbridge_providers::assistants::AssistantsBackend;
use callbridge_providers::chat::ChatCompletionsBackend;
use callbridge_providers::{ConversationEngine, DialogueBackend, RetryPolicy};

fn openai_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

fn assistant_id() -> Option<String> {
    std::env::var("ASSISTANT_ID").ok().filter(|k| !k.is_empty())
}

/// Run two turns and check both produce text under one session token.
async fn verify_two_turns(backend: Arc<dyn DialogueBackend>) {
    let retry = RetryPolicy::new(15, Duration::from_millis(1000), Duration::from_millis(500));
    let mut engine = ConversationEngine::new(backend, retry, 4000);

    let first = engine
        .respond("Reply with exactly the word 'hello'.")
        .await
        .expect("first turn failed");
    assert!(!first.is_empty());
    let token = engine.session_token().map(str::to_string);
    assert!(token.is_some());

    let second = engine
        .respond("Now reply with exactly the word 'goodbye'.")
        .await
        .expect("second turn failed");
    assert!(!second.is_empty());
    assert_eq!(engine.session_token().map(str::to_string), token);
    assert_eq!(engine.history().len(), 4);
}

#[tokio::test]
async fn test_chat_completions_turns() {
    let Some(key) = openai_key() else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };
    let backend = ChatCompletionsBackend::new(key, None, None, None);
    verify_two_turns(Arc::new(backend)).await;
}

#[tokio::test]
async fn test_assistants_turns() {
    let (Some(key), Some(id)) = (openai_key(), assistant_id()) else {
        eprintln!("Skipping: OPENAI_API_KEY or ASSISTANT_ID not set");
        return;
    };
    let backend = AssistantsBackend::new(key, id, None);
    verify_two_turns(Arc::new(backend)).await;
}
