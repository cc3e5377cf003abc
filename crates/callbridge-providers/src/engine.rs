//! Per-call dialogue state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use callbridge_core::error::{Stage, TurnError};
use callbridge_core::types::HistoryEntry;

use crate::{DialogueBackend, PendingRun, RetryPolicy, RunPoll, Submission, TurnRequest};

/// Turns transcripts into replies for one call.
///
/// Holds the call's history and the opaque remote session token. The token is
/// created by the backend on the first turn and reused for every later turn;
/// the engine never looks inside it.
pub struct ConversationEngine {
    backend: Arc<dyn DialogueBackend>,
    retry: RetryPolicy,
    max_input_chars: usize,
    session_token: Option<String>,
    history: Vec<HistoryEntry>,
}

impl ConversationEngine {
    pub fn new(backend: Arc<dyn DialogueBackend>, retry: RetryPolicy, max_input_chars: usize) -> Self {
        Self {
            backend,
            retry,
            max_input_chars,
            session_token: None,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Run one turn.
    ///
    /// The caller's text is appended to history before the backend is called
    /// and stays there whatever the outcome.
    pub async fn respond(&mut self, text: &str) -> Result<String, TurnError> {
        TurnError::check_size("transcript", text.chars().count(), self.max_input_chars)?;
        self.history.push(HistoryEntry::user(text));

        let request = TurnRequest {
            text,
            session_token: self.session_token.as_deref(),
            history: &self.history,
        };
        let submission = self.backend.submit(&request).await?;

        let reply = match submission {
            Submission::Ready {
                reply,
                session_token,
            } => {
                self.session_token = Some(session_token);
                reply
            }
            Submission::Pending(run) => {
                self.session_token = Some(run.session_token.clone());
                self.await_run(&run).await?
            }
        };

        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(TurnError::upstream(Stage::Dialogue, "empty reply"));
        }
        self.history.push(HistoryEntry::assistant(&reply));
        Ok(reply)
    }

    async fn await_run(&self, run: &PendingRun) -> Result<String, TurnError> {
        for attempt in 0..self.retry.max_attempts {
            tokio::time::sleep(self.retry.delay(attempt)).await;
            match self.backend.poll(run).await? {
                RunPoll::Ready(reply) => {
                    info!(run_id = %run.run_id, attempts = attempt + 1, "Dialogue turn completed");
                    return Ok(reply);
                }
                RunPoll::Pending => {
                    debug!(run_id = %run.run_id, attempt = attempt + 1, "Dialogue turn pending");
                }
                RunPoll::Failed(reason) => {
                    warn!(run_id = %run.run_id, %reason, "Dialogue turn failed");
                    return Err(TurnError::upstream(Stage::Dialogue, reason));
                }
            }
        }
        Err(TurnError::UpstreamTimeout {
            attempts: self.retry.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use callbridge_core::types::Role;

    /// Backend whose runs complete after `ready_after` polls (never if `None`).
    struct Scripted {
        ready_after: Option<u32>,
        polls: AtomicU32,
        seen_tokens: Mutex<Vec<Option<String>>>,
        seen_history_len: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(ready_after: Option<u32>) -> Arc<Self> {
            Arc::new(Self {
                ready_after,
                polls: AtomicU32::new(0),
                seen_tokens: Mutex::new(Vec::new()),
                seen_history_len: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DialogueBackend for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn submit(&self, request: &TurnRequest<'_>) -> Result<Submission, TurnError> {
            self.seen_tokens
                .lock()
                .unwrap()
                .push(request.session_token.map(String::from));
            self.seen_history_len.lock().unwrap().push(request.history.len());
            self.polls.store(0, Ordering::SeqCst);
            Ok(Submission::Pending(PendingRun {
                session_token: request.session_token.unwrap_or("thread_1").to_string(),
                run_id: "run_1".into(),
            }))
        }

        async fn poll(&self, _run: &PendingRun) -> Result<RunPoll, TurnError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.ready_after {
                Some(k) if n >= k => Ok(RunPoll::Ready(format!("reply after {n}"))),
                _ => Ok(RunPoll::Pending),
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(15, Duration::from_millis(1000), Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_run_completes() {
        let backend = Scripted::new(Some(3));
        let mut engine = ConversationEngine::new(backend.clone(), policy(), 4000);

        let reply = engine.respond("hello").await.unwrap();
        assert_eq!(reply, "reply after 3");
        assert_eq!(engine.session_token(), Some("thread_1"));
        assert_eq!(engine.history().len(), 2);
        assert_eq!(engine.history()[0].role, Role::User);
        assert_eq!(engine.history()[1].role, Role::Assistant);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_token_reused_across_turns() {
        let backend = Scripted::new(Some(1));
        let mut engine = ConversationEngine::new(backend.clone(), policy(), 4000);

        engine.respond("first").await.unwrap();
        engine.respond("second").await.unwrap();

        let tokens = backend.seen_tokens.lock().unwrap().clone();
        assert_eq!(tokens, vec![None, Some("thread_1".to_string())]);
        assert_eq!(*backend.seen_history_len.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exhausted_times_out() {
        let backend = Scripted::new(None);
        let mut engine = ConversationEngine::new(backend.clone(), policy(), 4000);

        let started = tokio::time::Instant::now();
        let err = engine.respond("are you there").await.unwrap_err();

        assert!(matches!(err, TurnError::UpstreamTimeout { attempts: 15 }));
        assert_eq!(backend.polls.load(Ordering::SeqCst), 15);
        assert!(started.elapsed() >= policy().budget());

        // The caller's text stays for context; no assistant entry was added.
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.history()[0].text, "are you there");
        assert_eq!(engine.session_token(), Some("thread_1"));
    }

    #[tokio::test]
    async fn test_failed_run_is_upstream_failure() {
        struct Failing;

        #[async_trait]
        impl DialogueBackend for Failing {
            fn id(&self) -> &str {
                "failing"
            }
            async fn submit(&self, _request: &TurnRequest<'_>) -> Result<Submission, TurnError> {
                Ok(Submission::Pending(PendingRun {
                    session_token: "t".into(),
                    run_id: "r".into(),
                }))
            }
            async fn poll(&self, _run: &PendingRun) -> Result<RunPoll, TurnError> {
                Ok(RunPoll::Failed("run failed: rate_limit_exceeded".into()))
            }
        }

        let retry = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        let mut engine = ConversationEngine::new(Arc::new(Failing), retry, 4000);
        let err = engine.respond("hi").await.unwrap_err();
        assert_eq!(err.kind(), "upstream_failure");
        assert_eq!(engine.history().len(), 1);
    }

    #[tokio::test]
    async fn test_oversize_transcript_rejected_before_history() {
        let backend = Scripted::new(Some(1));
        let mut engine = ConversationEngine::new(backend, policy(), 5);
        let err = engine.respond("much too long").await.unwrap_err();
        assert_eq!(err.kind(), "oversize");
        assert!(engine.history().is_empty());
    }
}
