//! Inbound frame decoding: base64 payloads to 16-bit linear PCM, and WAV
//! packaging for transcription.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::trace;

use callbridge_core::error::TurnError;
use callbridge_core::protocol::{AudioEncoding, MediaFormat};

/// One decoded inbound frame of mono 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    seq: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, seq: u64) -> Self {
        Self {
            samples,
            sample_rate,
            seq,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Arrival sequence number within the stream.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Turns base64 wire payloads into [`AudioFrame`]s for one stream.
pub struct AudioFrameDecoder {
    format: MediaFormat,
    min_frame_bytes: usize,
    next_seq: u64,
}

impl AudioFrameDecoder {
    pub fn new(format: MediaFormat, min_frame_bytes: usize) -> Self {
        Self {
            format,
            min_frame_bytes,
            next_seq: 0,
        }
    }

    pub fn format(&self) -> MediaFormat {
        self.format
    }

    /// Decode one payload.
    ///
    /// Returns `Ok(None)` for frames at or below the minimum size, which carry
    /// no analyzable audio.
    pub fn decode(&mut self, payload: &str) -> Result<Option<AudioFrame>, TurnError> {
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| TurnError::Transport(format!("invalid base64 payload: {e}")))?;

        if bytes.len() <= self.min_frame_bytes {
            trace!(bytes = bytes.len(), "Dropping undersized frame");
            return Ok(None);
        }

        let mut samples = match self.format.encoding {
            AudioEncoding::Pcmu => bytes.iter().map(|&b| ulaw_to_linear(b)).collect(),
            AudioEncoding::Pcma => bytes.iter().map(|&b| alaw_to_linear(b)).collect(),
            AudioEncoding::L16 => bytes
                .chunks_exact(2)
                .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
                .collect::<Vec<i16>>(),
        };

        if self.format.channels > 1 {
            samples = downmix(&samples, self.format.channels as usize);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(Some(AudioFrame::new(samples, self.format.sample_rate, seq)))
    }
}

/// Average interleaved channels into mono.
fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Decode one G.711 μ-law byte.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = ((u >> 4) & 0x07) as i32;
    let mantissa = (u & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + 0x84) << exponent) - 0x84;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Decode one G.711 A-law byte.
pub fn alaw_to_linear(byte: u8) -> i16 {
    let a = byte ^ 0x55;
    let exponent = ((a & 0x70) >> 4) as i32;
    let mut magnitude = (((a & 0x0F) as i32) << 4) + 8;
    if exponent != 0 {
        magnitude = (magnitude + 0x100) << (exponent - 1);
    }
    if a & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Size in bytes of the WAV produced by [`pcm_to_wav`] for `samples` mono samples.
pub fn wav_len(samples: usize) -> usize {
    44 + samples * 2
}
