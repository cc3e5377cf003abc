//! Inbound media pipeline: frame decoding, VAD, utterance assembly and STT.

pub mod assembler;
pub mod asset;
pub mod clock;
pub mod codec;
pub mod stt;
pub mod vad;

pub use assembler::{Utterance, UtteranceAssembler};
pub use asset::AudioAsset;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use codec::{AudioFrame, AudioFrameDecoder};
pub use stt::{TranscriptionClient, Transcriber, WhisperTranscriber};
pub use vad::{VadEvent, VadState, VoiceActivityDetector};
