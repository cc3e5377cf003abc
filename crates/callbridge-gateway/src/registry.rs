//! Process-wide call identity → session lookup.
//!
//! The registry never owns a session: entries are weak, so a session whose
//! connection and turn worker have both finished disappears from lookups even
//! if removal was missed.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::session::SessionShared;

#[derive(Default)]
pub struct CallSessionRegistry {
    sessions: RwLock<HashMap<String, Weak<SessionShared>>>,
}

impl CallSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under `call_id`, replacing any previous entry.
    pub async fn insert(&self, call_id: &str, session: &Arc<SessionShared>) {
        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.insert(call_id.to_string(), Arc::downgrade(session)) {
            if previous.strong_count() > 0 {
                warn!(call_id, "Replacing live session for call");
            }
        }
        debug!(call_id, "Session registered");
    }

    /// Remove `call_id` if it still maps to `session`.
    pub async fn remove(&self, call_id: &str, session: &Arc<SessionShared>) -> bool {
        let mut sessions = self.sessions.write().await;
        let matches = sessions
            .get(call_id)
            .is_some_and(|w| w.as_ptr() == Arc::as_ptr(session));
        if matches {
            sessions.remove(call_id);
            debug!(call_id, "Session unregistered");
        }
        matches
    }

    pub async fn get(&self, call_id: &str) -> Option<Arc<SessionShared>> {
        self.sessions.read().await.get(call_id)?.upgrade()
    }

    /// Number of live sessions. Prunes dead entries.
    pub async fn len(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, w| w.strong_count() > 0);
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn call_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callbridge_telephony::CallControl;

    struct NoopControl;

    #[async_trait]
    impl CallControl for NoopControl {
        fn id(&self) -> &str {
            "noop"
        }

        async fn playback_start(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn playback_stop(&self, _: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn speak(&self, _: &str, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn streaming_start(&self, _: &str, _: &str, _: &str, _: Option<&str>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn session(call_id: &str) -> Arc<SessionShared> {
        SessionShared::new(call_id, Arc::new(NoopControl), true)
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = CallSessionRegistry::new();
        let a = session("call-a");
        registry.insert("call-a", &a).await;

        let found = registry.get("call-a").await.unwrap();
        assert!(Arc::ptr_eq(&found, &a));
        assert!(registry.get("call-b").await.is_none());
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove("call-a", &a).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_ignores_replaced_session() {
        let registry = CallSessionRegistry::new();
        let old = session("call-a");
        let new = session("call-a");
        registry.insert("call-a", &old).await;
        registry.insert("call-a", &new).await;

        assert!(!registry.remove("call-a", &old).await);
        assert!(Arc::ptr_eq(&registry.get("call-a").await.unwrap(), &new));
    }

    #[tokio::test]
    async fn test_dropped_sessions_disappear() {
        let registry = CallSessionRegistry::new();
        let a = session("call-a");
        registry.insert("call-a", &a).await;
        drop(a);

        assert!(registry.get("call-a").await.is_none());
        assert!(registry.call_ids().await.is_empty());
        assert_eq!(registry.len().await, 0);
    }
}
