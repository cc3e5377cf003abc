//! Utterance assembly.
//!
//! Frames are buffered between VAD boundaries. While the detector is silent a
//! short pre-roll ring keeps the most recent frames, so the voiced frames that
//! led up to a delayed onset are not lost. [`UtteranceAssembler::finish`]
//! hands the buffered frames off as an owned [`Utterance`] and leaves the
//! assembler empty before returning.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use callbridge_core::error::TurnError;
use tracing::debug;

use crate::asset::AudioAsset;
use crate::codec::{AudioFrame, pcm_to_wav, wav_len};

/// One contiguous span of caller speech.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    started_at: Duration,
    seq: u64,
}

impl Utterance {
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn started_at(&self) -> Duration {
        self.started_at
    }

    /// Position of this utterance within its call.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn sample_rate(&self) -> u32 {
        self.frames.first().map(|f| f.sample_rate()).unwrap_or(8000)
    }

    pub fn duration_ms(&self) -> u64 {
        self.frames.iter().map(|f| f.duration_ms()).sum()
    }

    /// Concatenated PCM of all frames.
    pub fn pcm(&self) -> Vec<i16> {
        let total = self.frames.iter().map(|f| f.samples().len()).sum();
        let mut pcm = Vec::with_capacity(total);
        for frame in &self.frames {
            pcm.extend_from_slice(frame.samples());
        }
        pcm
    }

    /// Size of the WAV asset this utterance materializes to.
    pub fn encoded_len(&self) -> usize {
        wav_len(self.frames.iter().map(|f| f.samples().len()).sum())
    }

    /// Write the utterance as a mono 16-bit WAV file under `dir`.
    pub async fn materialize(&self, dir: &Path, max_bytes: usize) -> Result<AudioAsset, TurnError> {
        TurnError::check_size("utterance", self.encoded_len(), max_bytes)?;
        let wav = pcm_to_wav(&self.pcm(), self.sample_rate(), 1, 16);
        AudioAsset::create(dir, wav, ".wav", "audio/wav").await
    }
}

/// Buffers frames of the utterance currently being spoken.
pub struct UtteranceAssembler {
    preroll: VecDeque<AudioFrame>,
    preroll_len: usize,
    current: Option<Vec<AudioFrame>>,
    started_at: Duration,
    next_seq: u64,
}

impl UtteranceAssembler {
    /// `preroll_len` frames are kept while idle; with a VAD smoothing window of
    /// N this should be N - 1.
    pub fn new(preroll_len: usize) -> Self {
        Self {
            preroll: VecDeque::with_capacity(preroll_len),
            preroll_len,
            current: None,
            started_at: Duration::ZERO,
            next_seq: 0,
        }
    }

    /// Record a frame observed outside speech.
    pub fn idle(&mut self, frame: AudioFrame) {
        if self.preroll_len == 0 {
            return;
        }
        if self.preroll.len() == self.preroll_len {
            self.preroll.pop_front();
        }
        self.preroll.push_back(frame);
    }

    /// Open a new utterance with `frame` plus the `onset_frames - 1` frames
    /// before it.
    pub fn begin(&mut self, frame: AudioFrame, onset_frames: usize, started_at: Duration) {
        let lead = onset_frames.saturating_sub(1).min(self.preroll.len());
        let skip = self.preroll.len() - lead;
        let mut frames: Vec<AudioFrame> = self.preroll.drain(..).skip(skip).collect();
        frames.push(frame);

        if let Some(previous) = self.current.take() {
            debug!(frames = previous.len(), "Replacing unfinished utterance");
        }
        self.current = Some(frames);
        self.started_at = started_at;
    }

    /// Append a frame to the open utterance, or to the pre-roll when none is open.
    pub fn push(&mut self, frame: AudioFrame) {
        match self.current.as_mut() {
            Some(frames) => frames.push(frame),
            None => self.idle(frame),
        }
    }

    /// Hand off the open utterance, leaving the assembler empty.
    pub fn finish(&mut self) -> Option<Utterance> {
        let frames = self.current.take()?;
        if frames.is_empty() {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(Utterance {
            frames,
            started_at: self.started_at,
            seq,
        })
    }

    /// Drop the open utterance without handing it off.
    pub fn discard(&mut self) -> usize {
        self.current.take().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_collecting(&self) -> bool {
        self.current.is_some()
    }

    pub fn buffered_frames(&self) -> usize {
        self.current.as_ref().map(|f| f.len()).unwrap_or(0)
    }
}
