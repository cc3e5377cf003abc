//! Telephony call-control plumbing.
//!
//! The platform is driven through the [`CallControl`] trait: start and stop
//! audio playback on a call, speak a greeting, and ask the platform to open
//! the media stream. [`PlaybackController`] tracks the one playback a call may
//! have at a time. Implementations are feature-gated.

use async_trait::async_trait;

pub mod playback;
#[cfg(feature = "telnyx")]
pub mod telnyx;
pub mod webhook;

pub use playback::{PlaybackController, PlaybackHandle};
pub use webhook::{CallEvent, CallEventKind};

/// Control-plane actions on a live call.
#[async_trait]
pub trait CallControl: Send + Sync + 'static {
    /// Platform identifier (e.g., "telnyx").
    fn id(&self) -> &str;

    /// Play the audio at `audio_url` into the call, tagged with `playback_id`
    /// so the ended notification can be correlated.
    async fn playback_start(
        &self,
        call_id: &str,
        audio_url: &str,
        playback_id: &str,
    ) -> anyhow::Result<()>;

    /// Stop any playback on the call.
    async fn playback_stop(&self, call_id: &str) -> anyhow::Result<()>;

    /// Speak `text` with the platform's own TTS.
    async fn speak(&self, call_id: &str, text: &str, voice: &str, language: &str) -> anyhow::Result<()>;

    /// Ask the platform to open the media stream to `stream_url`.
    async fn streaming_start(
        &self,
        call_id: &str,
        stream_url: &str,
        track: &str,
        client_state: Option<&str>,
    ) -> anyhow::Result<()>;
}
