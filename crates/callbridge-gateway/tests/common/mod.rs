//! In-process fakes for every external collaborator of a call session.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use callbridge_core::config::{Config, GatewayConfig, MediaConfig};
use callbridge_core::error::TurnError;
use callbridge_core::protocol::{AudioEncoding, MediaFormat, StreamEvent, StreamStart};
use callbridge_gateway::connection::MediaStream;
use callbridge_gateway::{GatewayState, Services};
use callbridge_media::{AudioAsset, Clock, ManualClock, TranscriptionClient, Transcriber};
use callbridge_providers::{
    DialogueBackend, PendingRun, RetryPolicy, RunPoll, Submission, TurnRequest,
};
use callbridge_telephony::CallControl;
use callbridge_tts::{SpeechAsset, SpeechSynthesizer, SynthesisClient};

pub const PUBLIC_URL: &str = "https://bridge.example.com";
pub const FRAME_MS: u64 = 20;
const FRAME_SAMPLES: usize = 160;

/// Returns scripted transcripts in order, then "hello".
#[derive(Default)]
pub struct FakeTranscriber {
    script: Mutex<VecDeque<(String, Duration)>>,
    pub calls: AtomicU32,
}

impl FakeTranscriber {
    pub fn say(&self, text: &str) {
        self.say_after(text, Duration::ZERO);
    }

    pub fn say_after(&self, text: &str, delay: Duration) {
        self.script.lock().unwrap().push_back((text.to_string(), delay));
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcribe(&self, asset: &AudioAsset) -> Result<String, TurnError> {
        assert!(asset.path().exists());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let (text, delay) = next.unwrap_or_else(|| ("hello".to_string(), Duration::ZERO));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(text)
    }
}

/// What the dialogue fake saw for one submission.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub text: String,
    pub session_token: Option<String>,
    pub history_len: usize,
}

/// Asynchronous backend: every turn is a run that stays pending for
/// `pending_polls` polls.
pub struct FakeDialogue {
    pub pending_polls: AtomicU32,
    pub submitted: Mutex<Vec<Submitted>>,
    pub polls: AtomicU32,
    runs: Mutex<HashMap<String, (String, u32)>>,
}

impl FakeDialogue {
    pub fn new(pending_polls: u32) -> Self {
        Self {
            pending_polls: AtomicU32::new(pending_polls),
            submitted: Mutex::new(Vec::new()),
            polls: AtomicU32::new(0),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl DialogueBackend for FakeDialogue {
    fn id(&self) -> &str {
        "fake"
    }

    async fn submit(&self, request: &TurnRequest<'_>) -> Result<Submission, TurnError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(Submitted {
            text: request.text.to_string(),
            session_token: request.session_token.map(str::to_string),
            history_len: request.history.len(),
        });
        let run_id = format!("run-{}", submitted.len());
        self.runs
            .lock()
            .unwrap()
            .insert(run_id.clone(), (request.text.to_string(), 0));
        Ok(Submission::Pending(PendingRun {
            session_token: "thread-1".into(),
            run_id,
        }))
    }

    async fn poll(&self, run: &PendingRun) -> Result<RunPoll, TurnError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut runs = self.runs.lock().unwrap();
        let Some((text, polls)) = runs.get_mut(&run.run_id) else {
            return Ok(RunPoll::Failed("unknown run".into()));
        };
        if *polls < self.pending_polls.load(Ordering::SeqCst) {
            *polls += 1;
            return Ok(RunPoll::Pending);
        }
        Ok(RunPoll::Ready(format!("You said {text}")))
    }
}

pub struct FakeSynthesizer;

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn synthesize(&self, _text: &str) -> Result<SpeechAsset, TurnError> {
        Ok(SpeechAsset {
            bytes: Bytes::from_static(b"ID3fake"),
            mime: "audio/mpeg",
        })
    }
}

/// Records every control-plane action.
#[derive(Default)]
pub struct RecordingControl {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingControl {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl CallControl for RecordingControl {
    fn id(&self) -> &str {
        "recording"
    }

    async fn playback_start(&self, call_id: &str, url: &str, playback_id: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("playback_start {call_id} {url} {playback_id}"));
        Ok(())
    }

    async fn playback_stop(&self, call_id: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("playback_stop {call_id}"));
        Ok(())
    }

    async fn speak(&self, call_id: &str, text: &str, _voice: &str, _language: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("speak {call_id} {text}"));
        Ok(())
    }

    async fn streaming_start(
        &self,
        call_id: &str,
        stream_url: &str,
        track: &str,
        _client_state: Option<&str>,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("streaming_start {call_id} {stream_url} {track}"));
        Ok(())
    }
}

pub struct Harness {
    pub state: Arc<GatewayState>,
    pub clock: Arc<ManualClock>,
    pub transcriber: Arc<FakeTranscriber>,
    pub dialogue: Arc<FakeDialogue>,
    pub control: Arc<RecordingControl>,
    pub temp: tempfile::TempDir,
}

impl Harness {
    pub fn new(dialogue: FakeDialogue) -> Self {
        Self::with_config(dialogue, |_| {})
    }

    pub fn with_config(dialogue: FakeDialogue, tweak: impl FnOnce(&mut Config)) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config {
            gateway: Some(GatewayConfig {
                public_url: Some(PUBLIC_URL.into()),
                ..Default::default()
            }),
            media: Some(MediaConfig {
                temp_dir: Some(temp.path().to_string_lossy().into_owned()),
            }),
            ..Default::default()
        };
        tweak(&mut config);

        let transcriber = Arc::new(FakeTranscriber::default());
        let dialogue = Arc::new(dialogue);
        let control = Arc::new(RecordingControl::default());
        let services = Services {
            transcriber: TranscriptionClient::new(transcriber.clone(), 1024 * 1024),
            dialogue: dialogue.clone(),
            retry: RetryPolicy::new(10, Duration::from_millis(20), Duration::ZERO),
            max_dialogue_chars: 4000,
            synthesizer: SynthesisClient::new(Arc::new(FakeSynthesizer), 4096, 1024 * 1024),
            call_control: control.clone(),
        };

        let clock = Arc::new(ManualClock::new());
        let state = GatewayState::new(Arc::new(config), services)
            .with_clock(clock.clone() as Arc<dyn Clock>);

        Self {
            state: Arc::new(state),
            clock,
            transcriber,
            dialogue,
            control,
            temp,
        }
    }

    pub async fn open_stream(&self, call_id: &str) -> MediaStream {
        let mut stream = MediaStream::new(self.state.clone());
        let start = StreamStart {
            call_id: call_id.into(),
            stream_id: None,
            format: MediaFormat {
                encoding: AudioEncoding::L16,
                sample_rate: 8000,
                channels: 1,
            },
        };
        assert!(stream.handle_event(StreamEvent::Start(start)).await.is_continue());
        stream
    }

    /// Feed `ms` of loud audio, advancing the clock one frame at a time.
    pub async fn speak(&self, stream: &mut MediaStream, ms: u64) {
        self.feed(stream, ms, 2000).await;
    }

    pub async fn silence(&self, stream: &mut MediaStream, ms: u64) {
        self.feed(stream, ms, 0).await;
    }

    /// Speech followed by enough silence to close the utterance.
    pub async fn utterance(&self, stream: &mut MediaStream, ms: u64) {
        self.speak(stream, ms).await;
        self.silence(stream, 1600).await;
    }

    async fn feed(&self, stream: &mut MediaStream, ms: u64, level: i16) {
        for _ in 0..ms / FRAME_MS {
            self.clock.advance(Duration::from_millis(FRAME_MS));
            let event = StreamEvent::Media {
                payload: l16_payload(level),
                track: Some("inbound".into()),
            };
            assert!(stream.handle_event(event).await.is_continue());
        }
    }

    /// Files left in the utterance temp directory.
    pub fn temp_files(&self) -> usize {
        std::fs::read_dir(self.temp.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn l16_payload(level: i16) -> String {
    let mut bytes = Vec::with_capacity(FRAME_SAMPLES * 2);
    for i in 0..FRAME_SAMPLES {
        let sample = if i % 2 == 0 { level } else { level.saturating_neg() };
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
