//! Energy-based Voice Activity Detection (VAD).
//!
//! Frames are classified by the RMS of their decoded 16-bit samples. Onset
//! requires both the frame itself and the mean over a short smoothing window to
//! exceed the threshold, so a single click does not open an utterance. Release
//! is evaluated against the injected [`Clock`] on every observed frame: once no
//! voiced frame has been seen for `silence_duration_ms`, the span either becomes
//! a boundary or, if it carried less than `min_speech_duration_ms` of voiced
//! audio, is discarded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use callbridge_core::config::VadConfig;
use tracing::trace;

use crate::clock::Clock;
use crate::codec::AudioFrame;

/// Detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    Speaking,
}

/// Timing of one detected speech span, in clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSpan {
    pub started_at: Duration,
    pub ended_at: Duration,
    /// Sum of voiced frame durations inside the span.
    pub speech_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Silence→Speaking. `onset_frames` counts the trailing voiced frames
    /// (including the current one) that belong to the new span.
    SpeechStarted { onset_frames: usize },
    /// Speaking→Silence with enough speech to form an utterance.
    Boundary(SpeechSpan),
    /// Speaking→Silence for a burst shorter than the minimum.
    Discarded { speech_ms: u64 },
}

/// Voice Activity Detector using RMS energy threshold on 16-bit PCM.
pub struct VoiceActivityDetector {
    threshold: f64,
    silence_duration: Duration,
    min_speech_ms: u64,
    window_len: usize,
    clock: Arc<dyn Clock>,
    state: VadState,
    /// (energy, duration_ms) of the most recent frames.
    window: VecDeque<(f64, u64)>,
    started_at: Duration,
    last_voice_at: Duration,
    speech_ms: u64,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig, clock: Arc<dyn Clock>) -> Self {
        let window_len = config.smoothing_window.max(1);
        Self {
            threshold: config.threshold,
            silence_duration: Duration::from_millis(config.silence_duration_ms),
            min_speech_ms: config.min_speech_duration_ms,
            window_len,
            clock,
            state: VadState::Silence,
            window: VecDeque::with_capacity(window_len),
            started_at: Duration::ZERO,
            last_voice_at: Duration::ZERO,
            speech_ms: 0,
        }
    }

    /// Compute RMS energy of a PCM frame.
    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    /// Process a single frame, in arrival order.
    pub fn observe(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        let now = self.clock.now();
        let energy = Self::rms(frame.samples());
        let duration_ms = frame.duration_ms();
        let voiced = energy > self.threshold;

        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back((energy, duration_ms));

        match self.state {
            VadState::Silence => {
                if !voiced || self.smoothed_energy() <= self.threshold {
                    return None;
                }
                let onset: Vec<u64> = self
                    .window
                    .iter()
                    .rev()
                    .take_while(|(e, _)| *e > self.threshold)
                    .map(|(_, d)| *d)
                    .collect();
                let onset_ms: u64 = onset.iter().sum();

                self.state = VadState::Speaking;
                self.speech_ms = onset_ms;
                let lead = Duration::from_millis(onset_ms.saturating_sub(duration_ms));
                self.started_at = now.saturating_sub(lead);
                self.last_voice_at = now;
                trace!(energy, onset_frames = onset.len(), "Speech started");
                Some(VadEvent::SpeechStarted {
                    onset_frames: onset.len(),
                })
            }
            VadState::Speaking => {
                if voiced {
                    self.last_voice_at = now;
                    self.speech_ms += duration_ms;
                    return None;
                }
                if now.saturating_sub(self.last_voice_at) <= self.silence_duration {
                    return None;
                }
                Some(self.release(now))
            }
        }
    }

    /// Close any open span at end of stream.
    pub fn flush(&mut self) -> Option<VadEvent> {
        match self.state {
            VadState::Silence => None,
            VadState::Speaking => {
                let now = self.clock.now();
                Some(self.release(now))
            }
        }
    }

    fn release(&mut self, now: Duration) -> VadEvent {
        let speech_ms = self.speech_ms;
        let span = SpeechSpan {
            started_at: self.started_at,
            ended_at: now,
            speech_ms,
        };
        self.reset();

        if speech_ms >= self.min_speech_ms {
            trace!(speech_ms, "Speech boundary");
            VadEvent::Boundary(span)
        } else {
            trace!(speech_ms, "Discarding short burst");
            VadEvent::Discarded { speech_ms }
        }
    }

    fn smoothed_energy(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().map(|(e, _)| e).sum::<f64>() / self.window.len() as f64
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Whether speech is currently active.
    pub fn is_active(&self) -> bool {
        self.state == VadState::Speaking
    }

    /// Reset the detector state.
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.window.clear();
        self.speech_ms = 0;
        self.started_at = Duration::ZERO;
        self.last_voice_at = Duration::ZERO;
    }
}
