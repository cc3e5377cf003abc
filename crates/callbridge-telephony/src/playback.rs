//! Per-call playback tracking.
//!
//! A call has at most one active playback. Starting a new one stops the
//! previous one first. Each active playback carries a lease (for example the
//! served audio asset) that is dropped when the playback ends, is stopped, or
//! is replaced.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::CallControl;

/// Opaque id correlating one playback with the platform's notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(String);

impl PlaybackHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PlaybackHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct ActivePlayback<L> {
    handle: PlaybackHandle,
    _lease: L,
}

pub struct PlaybackController<L = ()> {
    call_id: String,
    control: Arc<dyn CallControl>,
    active: Mutex<Option<ActivePlayback<L>>>,
    /// Mirrors `active.is_some()` for readers that cannot await the lock.
    playing: AtomicBool,
}

impl<L: Send> PlaybackController<L> {
    pub fn new(call_id: impl Into<String>, control: Arc<dyn CallControl>) -> Self {
        Self {
            call_id: call_id.into(),
            control,
            active: Mutex::new(None),
            playing: AtomicBool::new(false),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Start playing `audio_url`. Any active playback is stopped first.
    ///
    /// On failure no handle becomes active and `lease` is dropped.
    pub async fn start(&self, audio_url: &str, lease: L) -> anyhow::Result<PlaybackHandle> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.playing.store(false, Ordering::SeqCst);
            debug!(call_id = %self.call_id, playback_id = %previous.handle, "Replacing active playback");
            if let Err(e) = self.control.playback_stop(&self.call_id).await {
                warn!(call_id = %self.call_id, error = %e, "Failed to stop previous playback");
            }
        }

        let handle = PlaybackHandle::new();
        self.control
            .playback_start(&self.call_id, audio_url, handle.as_str())
            .await?;
        *active = Some(ActivePlayback {
            handle: handle.clone(),
            _lease: lease,
        });
        self.playing.store(true, Ordering::SeqCst);
        Ok(handle)
    }

    /// Stop `handle` if it is the active playback. Returns whether a stop was
    /// issued; an inactive or stale handle is a no-op.
    pub async fn stop(&self, handle: &PlaybackHandle) -> bool {
        let mut active = self.active.lock().await;
        if active.as_ref().is_none_or(|a| &a.handle != handle) {
            return false;
        }
        self.clear(&mut active);
        self.stop_remote().await;
        true
    }

    /// Stop whatever is playing. Returns the handle that was stopped.
    pub async fn interrupt(&self) -> Option<PlaybackHandle> {
        let mut active = self.active.lock().await;
        let previous = self.clear(&mut active)?;
        self.stop_remote().await;
        Some(previous)
    }

    /// The platform reported `playback_id` as ended. Clears it if active.
    pub async fn finished(&self, playback_id: &str) -> bool {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|a| a.handle.as_str() == playback_id) {
            self.clear(&mut active);
            return true;
        }
        false
    }

    pub async fn active(&self) -> Option<PlaybackHandle> {
        self.active.lock().await.as_ref().map(|a| a.handle.clone())
    }

    /// Whether a playback is active, without waiting for the lock.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Forget the active playback without contacting the platform.
    pub async fn release(&self) {
        let mut active = self.active.lock().await;
        self.clear(&mut active);
    }

    fn clear(&self, active: &mut Option<ActivePlayback<L>>) -> Option<PlaybackHandle> {
        self.playing.store(false, Ordering::SeqCst);
        active.take().map(|a| a.handle)
    }

    async fn stop_remote(&self) {
        // Best effort: the turn that owned the playback is already abandoned.
        if let Err(e) = self.control.playback_stop(&self.call_id).await {
            warn!(call_id = %self.call_id, error = %e, "Failed to stop playback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingControl {
        calls: StdMutex<Vec<String>>,
        fail_start: AtomicBool,
        fail_stop: AtomicBool,
    }

    impl RecordingControl {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CallControl for RecordingControl {
        fn id(&self) -> &str {
            "recording"
        }

        async fn playback_start(&self, _call_id: &str, url: &str, _id: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("start {url}"));
            if self.fail_start.load(Ordering::SeqCst) {
                anyhow::bail!("start refused");
            }
            Ok(())
        }

        async fn playback_stop(&self, _call_id: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("stop".into());
            if self.fail_stop.load(Ordering::SeqCst) {
                anyhow::bail!("stop refused");
            }
            Ok(())
        }

        async fn speak(&self, _: &str, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn streaming_start(&self, _: &str, _: &str, _: &str, _: Option<&str>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Lease(Arc<AtomicUsize>);

    impl Drop for Lease {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (Arc<RecordingControl>, PlaybackController<Lease>, Arc<AtomicUsize>) {
        let control = Arc::new(RecordingControl::default());
        let playback = PlaybackController::new("call-1", control.clone());
        (control, playback, Arc::new(AtomicUsize::new(0)))
    }

    #[tokio::test]
    async fn test_start_and_finish() {
        let (control, playback, dropped) = setup();
        let handle = playback.start("http://a/1", Lease(dropped.clone())).await.unwrap();
        assert_eq!(playback.active().await, Some(handle.clone()));
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        assert!(!playback.finished("someone-else").await);
        assert!(playback.finished(handle.as_str()).await);
        assert_eq!(playback.active().await, None);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(control.calls(), vec!["start http://a/1"]);
    }

    #[tokio::test]
    async fn test_start_stops_previous_first() {
        let (control, playback, dropped) = setup();
        playback.start("http://a/1", Lease(dropped.clone())).await.unwrap();
        let second = playback.start("http://a/2", Lease(dropped.clone())).await.unwrap();
        assert_eq!(
            control.calls(),
            vec!["start http://a/1", "stop", "start http://a/2"]
        );
        assert_eq!(playback.active().await, Some(second));
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_inactive_is_noop() {
        let (control, playback, dropped) = setup();
        assert!(!playback.stop(&PlaybackHandle::new()).await);

        let handle = playback.start("http://a/1", Lease(dropped)).await.unwrap();
        assert!(!playback.stop(&PlaybackHandle::new()).await);
        assert!(playback.stop(&handle).await);
        assert!(!playback.stop(&handle).await);
        assert_eq!(control.calls(), vec!["start http://a/1", "stop"]);
    }

    #[tokio::test]
    async fn test_concurrent_interrupts_stop_once() {
        let (control, playback, dropped) = setup();
        let playback = Arc::new(playback);
        playback.start("http://a/1", Lease(dropped)).await.unwrap();

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let playback = playback.clone();
                tokio::spawn(async move { playback.interrupt().await })
            })
            .collect();
        let mut stopped = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                stopped += 1;
            }
        }
        assert_eq!(stopped, 1);
        assert_eq!(control.calls().iter().filter(|c| *c == "stop").count(), 1);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_nothing_active() {
        let (control, playback, dropped) = setup();
        control.fail_start.store(true, Ordering::SeqCst);
        assert!(playback.start("http://a/1", Lease(dropped.clone())).await.is_err());
        assert_eq!(playback.active().await, None);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_stop_still_clears() {
        let (control, playback, dropped) = setup();
        playback.start("http://a/1", Lease(dropped)).await.unwrap();
        control.fail_stop.store(true, Ordering::SeqCst);
        assert!(playback.interrupt().await.is_some());
        assert_eq!(playback.active().await, None);
    }

    #[tokio::test]
    async fn test_is_playing_follows_active() {
        let (control, playback, dropped) = setup();
        assert!(!playback.is_playing());

        let handle = playback.start("http://a/1", Lease(dropped.clone())).await.unwrap();
        assert!(playback.is_playing());
        playback.finished(handle.as_str()).await;
        assert!(!playback.is_playing());

        playback.start("http://a/2", Lease(dropped.clone())).await.unwrap();
        playback.interrupt().await;
        assert!(!playback.is_playing());

        control.fail_start.store(true, Ordering::SeqCst);
        assert!(playback.start("http://a/3", Lease(dropped)).await.is_err());
        assert!(!playback.is_playing());
    }

    #[tokio::test]
    async fn test_release_does_not_call_platform() {
        let (control, playback, dropped) = setup();
        playback.start("http://a/1", Lease(dropped.clone())).await.unwrap();
        playback.release().await;
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(control.calls(), vec!["start http://a/1"]);
    }
}
