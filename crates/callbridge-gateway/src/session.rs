//! Per-call session.
//!
//! A session is split in two. [`CallSession`] lives on the connection task and
//! owns the frame decoder, the VAD and the utterance assembler; it is the only
//! writer of that state, so frames are handled strictly in arrival order.
//! Finished utterances go over a queue to a single turn worker, which runs
//! transcription, dialogue, synthesis and playback one turn at a time.
//! [`SessionShared`] holds what both halves (and webhook handlers) need: the
//! phase, the playback controller, and a generation counter that barge-in bumps
//! to invalidate whatever turn is in flight.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use callbridge_core::error::{Rejection, Stage, TurnError};
use callbridge_core::protocol::StreamStart;
use callbridge_core::types::ConversationTurn;
use callbridge_media::{
    AudioFrame, AudioFrameDecoder, Utterance, UtteranceAssembler, VadEvent, VoiceActivityDetector,
};
use callbridge_providers::ConversationEngine;
use callbridge_telephony::{CallControl, PlaybackController};

use crate::assets::AssetLease;
use crate::state::GatewayState;

/// Turn orchestration phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    Transcribing,
    Responding,
    Playing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Responding => "responding",
            Self::Playing => "playing",
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the connection task, the turn worker and webhooks.
pub struct SessionShared {
    call_id: String,
    phase: Mutex<Phase>,
    /// Bumped under the phase lock on barge-in.
    generation: AtomicU64,
    speaking: AtomicBool,
    /// A turn is between transcription and its final phase.
    busy: AtomicBool,
    closed: AtomicBool,
    correlate_playback: bool,
    playback: PlaybackController<AssetLease>,
    pending_interrupt: Mutex<Option<JoinHandle<()>>>,
    turns: Mutex<Vec<ConversationTurn>>,
}

impl SessionShared {
    pub fn new(call_id: &str, control: Arc<dyn CallControl>, correlate_playback: bool) -> Arc<Self> {
        Arc::new(Self {
            call_id: call_id.to_string(),
            phase: Mutex::new(Phase::Idle),
            generation: AtomicU64::new(0),
            speaking: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            correlate_playback,
            playback: PlaybackController::new(call_id, control),
            pending_interrupt: Mutex::new(None),
            turns: Mutex::new(Vec::new()),
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn playback(&self) -> &PlaybackController<AssetLease> {
        &self.playback
    }

    /// Completed turns, oldest first.
    pub fn turns(&self) -> Vec<ConversationTurn> {
        lock(&self.turns).clone()
    }

    /// Caller speech began. Returns true when this is a barge-in and active
    /// playback has to be stopped.
    ///
    /// A turn that is already responding is invalidated. A turn that is still
    /// transcribing belongs to earlier caller speech and keeps running.
    fn speech_started(&self) -> bool {
        self.speaking.store(true, Ordering::SeqCst);
        let mut phase = lock(&self.phase);
        let playing = self.playback.is_playing();
        match *phase {
            Phase::Idle => *phase = Phase::Listening,
            Phase::Playing if self.busy.load(Ordering::SeqCst) => *phase = Phase::Transcribing,
            Phase::Responding | Phase::Playing => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                *phase = Phase::Listening;
                return true;
            }
            Phase::Listening | Phase::Transcribing => {}
        }
        playing
    }

    fn speech_completed(&self) {
        self.speaking.store(false, Ordering::SeqCst);
    }

    fn speech_discarded(&self) {
        self.speaking.store(false, Ordering::SeqCst);
        let mut phase = lock(&self.phase);
        if *phase == Phase::Listening {
            *phase = Phase::Idle;
        }
    }

    /// Mark a turn as in flight and return the generation it runs under.
    /// The phase stays Playing while an earlier reply is still audible.
    fn begin_turn(&self) -> u64 {
        let mut phase = lock(&self.phase);
        self.busy.store(true, Ordering::SeqCst);
        if !(*phase == Phase::Playing && self.playback.is_playing()) {
            *phase = Phase::Transcribing;
        }
        self.generation()
    }

    fn end_turn(&self) {
        let _phase = lock(&self.phase);
        self.busy.store(false, Ordering::SeqCst);
    }

    /// Move to `next` only if no barge-in happened since `generation`.
    fn advance(&self, generation: u64, next: Phase) -> bool {
        let mut phase = lock(&self.phase);
        if self.generation() != generation || self.is_closed() {
            return false;
        }
        *phase = next;
        self.busy.store(next == Phase::Responding, Ordering::SeqCst);
        true
    }

    /// Leave the turn, unless superseded. With playback correlation a reply
    /// that is still active keeps the session in Playing.
    fn settle(&self, generation: u64) -> bool {
        let next = if self.speaking.load(Ordering::SeqCst) {
            Phase::Listening
        } else if self.correlate_playback && self.playback.is_playing() {
            Phase::Playing
        } else {
            Phase::Idle
        };
        self.advance(generation, next)
    }

    /// Playback is no longer active; drop out of Playing.
    fn leave_playing(&self) {
        let mut phase = lock(&self.phase);
        if *phase == Phase::Playing {
            *phase = if self.busy.load(Ordering::SeqCst) {
                Phase::Transcribing
            } else if self.speaking.load(Ordering::SeqCst) {
                Phase::Listening
            } else {
                Phase::Idle
            };
        }
    }

    /// Stop active playback in the background. Interrupts run one after the
    /// other, and the turn worker waits for them before responding again.
    fn begin_interrupt(self: &Arc<Self>) {
        let mut pending = lock(&self.pending_interrupt);
        let previous = pending.take();
        let shared = Arc::clone(self);
        *pending = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Some(handle) = shared.playback.interrupt().await {
                info!(call_id = %shared.call_id, playback_id = %handle, "Barge-in stopped playback");
            }
            shared.leave_playing();
        }));
    }

    async fn wait_for_interrupt(&self) {
        let pending = lock(&self.pending_interrupt).take();
        if let Some(task) = pending {
            let _ = task.await;
        }
    }

    /// The platform reported a playback as ended.
    pub async fn playback_finished(&self, playback_id: &str) -> bool {
        if !self.playback.finished(playback_id).await {
            debug!(call_id = %self.call_id, playback_id, "Ignoring stale playback-ended");
            return false;
        }
        self.leave_playing();
        true
    }

    fn record(&self, turn: ConversationTurn) {
        lock(&self.turns).push(turn);
    }
}

/// Frame intake for one call. Owned by the connection task.
pub struct CallSession {
    shared: Arc<SessionShared>,
    state: Arc<GatewayState>,
    decoder: AudioFrameDecoder,
    vad: VoiceActivityDetector,
    assembler: UtteranceAssembler,
    turn_tx: mpsc::UnboundedSender<Utterance>,
    worker: JoinHandle<()>,
}

impl CallSession {
    /// Create the session for a started stream, register it and spawn its
    /// turn worker.
    pub async fn start(state: Arc<GatewayState>, start: &StreamStart) -> Self {
        let vad_config = state.config.vad();
        let telephony = state.config.telephony();

        let shared = SessionShared::new(
            &start.call_id,
            state.services.call_control.clone(),
            telephony.playback_correlation,
        );
        state.registry.insert(&start.call_id, &shared).await;

        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        let worker = TurnWorker {
            shared: shared.clone(),
            state: state.clone(),
            engine: state.services.conversation_engine(),
            last_transcript: None,
            last_reply: None,
        };
        let worker = tokio::spawn(worker.run(turn_rx));

        info!(
            call_id = %start.call_id,
            encoding = ?start.format.encoding,
            sample_rate = start.format.sample_rate,
            "Call session started"
        );
        #[cfg(feature = "metrics")]
        crate::metrics::record_session_start();

        Self {
            decoder: AudioFrameDecoder::new(start.format, vad_config.min_frame_bytes),
            vad: VoiceActivityDetector::new(&vad_config, state.clock.clone()),
            assembler: UtteranceAssembler::new(vad_config.smoothing_window.saturating_sub(1)),
            shared,
            state,
            turn_tx,
            worker,
        }
    }

    pub fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    pub fn call_id(&self) -> &str {
        self.shared.call_id()
    }

    /// Handle one base64 media payload.
    pub fn on_media(&mut self, payload: &str) -> Result<(), TurnError> {
        if let Some(frame) = self.decoder.decode(payload)? {
            self.on_frame(frame);
        }
        Ok(())
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        match self.vad.observe(&frame) {
            Some(VadEvent::SpeechStarted { onset_frames }) => {
                self.assembler
                    .begin(frame, onset_frames, self.state.clock.now());
                if self.shared.speech_started() {
                    info!(call_id = %self.call_id(), "Barge-in");
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_barge_in();
                    self.shared.begin_interrupt();
                }
            }
            Some(VadEvent::Boundary(span)) => {
                self.shared.speech_completed();
                debug!(call_id = %self.call_id(), speech_ms = span.speech_ms, "Utterance boundary");
                self.dispatch();
                self.assembler.idle(frame);
            }
            Some(VadEvent::Discarded { speech_ms }) => {
                let frames = self.assembler.discard();
                self.shared.speech_discarded();
                debug!(call_id = %self.call_id(), speech_ms, frames, "Discarded short burst");
                self.assembler.idle(frame);
            }
            None if self.vad.is_active() => self.assembler.push(frame),
            None => self.assembler.idle(frame),
        }
    }

    /// Hand the buffered utterance to the turn worker.
    fn dispatch(&mut self) {
        let Some(utterance) = self.assembler.finish() else {
            return;
        };
        debug!(
            call_id = %self.call_id(),
            seq = utterance.seq(),
            frames = utterance.frame_count(),
            duration_ms = utterance.duration_ms(),
            "Utterance queued"
        );
        if self.turn_tx.send(utterance).is_err() {
            warn!(call_id = %self.call_id(), "Turn worker is gone; utterance dropped");
        }
    }

    pub async fn on_playback_ended(&self, playback_id: &str) {
        self.shared.playback_finished(playback_id).await;
    }

    /// Tear the session down: flush buffered speech, unregister, release the
    /// active playback. The turn worker keeps running until its queue drains;
    /// its handle is returned.
    pub async fn close(mut self) -> JoinHandle<()> {
        self.shared.closed.store(true, Ordering::SeqCst);

        match self.vad.flush() {
            Some(VadEvent::Boundary(_)) => self.dispatch(),
            Some(VadEvent::Discarded { .. }) => {
                self.assembler.discard();
            }
            _ => {}
        }

        let Self {
            shared,
            state,
            turn_tx,
            worker,
            ..
        } = self;
        drop(turn_tx);

        state.registry.remove(shared.call_id(), &shared).await;
        shared.playback.release().await;
        info!(call_id = %shared.call_id(), turns = lock(&shared.turns).len(), "Call session closed");
        #[cfg(feature = "metrics")]
        crate::metrics::record_session_end();

        worker
    }
}

/// Reduce a transcript to lowercase words for comparison.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decide whether a transcript should reach the dialogue engine.
pub fn validate_transcript(
    text: &str,
    previous: Option<&str>,
    last_reply: Option<&str>,
) -> Result<(), Rejection> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Rejection::Empty);
    }
    let normalized = normalize(text);
    if normalized.is_empty() {
        return Err(Rejection::PunctuationOnly);
    }
    if previous.is_some_and(|p| normalize(p) == normalized) {
        return Err(Rejection::Duplicate);
    }
    if let Some(reply) = last_reply {
        let reply = normalize(reply);
        let words = normalized.split(' ').count();
        if reply == normalized || (words >= 3 && reply.contains(&normalized)) {
            return Err(Rejection::Echo);
        }
    }
    Ok(())
}

/// Runs the turns of one call, one at a time, in utterance order.
struct TurnWorker {
    shared: Arc<SessionShared>,
    state: Arc<GatewayState>,
    engine: ConversationEngine,
    last_transcript: Option<String>,
    last_reply: Option<String>,
}

impl TurnWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Utterance>) {
        while let Some(utterance) = rx.recv().await {
            let call_id = self.shared.call_id.clone();
            let seq = utterance.seq();

            if self.shared.is_closed() {
                self.flush_after_close(&utterance).await;
                continue;
            }

            let generation = self.shared.begin_turn();
            let started = Instant::now();
            match self.take_turn(&utterance, generation).await {
                Ok(Some(turn)) => {
                    info!(
                        call_id = %call_id,
                        seq,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        playback_id = turn.playback_id.as_deref().unwrap_or(""),
                        "Turn completed"
                    );
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_turn(started.elapsed().as_secs_f64());
                    self.shared.record(turn);
                }
                Ok(None) => {
                    debug!(call_id = %call_id, seq, "Turn superseded");
                }
                Err(TurnError::ValidationRejected(reason)) => {
                    debug!(call_id = %call_id, seq, %reason, "Transcript rejected");
                    self.shared.settle(generation);
                }
                Err(e) => {
                    warn!(call_id = %call_id, seq, kind = e.kind(), error = %e, "Turn abandoned");
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_error(e.kind());
                    self.shared.settle(generation);
                }
            }
            self.shared.end_turn();
        }
        debug!(call_id = %self.shared.call_id, "Turn worker finished");
    }

    async fn take_turn(
        &mut self,
        utterance: &Utterance,
        generation: u64,
    ) -> Result<Option<ConversationTurn>, TurnError> {
        let transcript = self.transcribe(utterance).await?;
        info!(call_id = %self.shared.call_id, seq = utterance.seq(), %transcript, "Transcript");

        let verdict = validate_transcript(
            &transcript,
            self.last_transcript.as_deref(),
            self.last_reply.as_deref(),
        );
        if !matches!(verdict, Err(Rejection::Empty | Rejection::PunctuationOnly)) {
            self.last_transcript = Some(transcript.clone());
        }
        verdict.map_err(TurnError::ValidationRejected)?;

        self.shared.wait_for_interrupt().await;
        if !self.shared.advance(generation, Phase::Responding) {
            return Ok(None);
        }
        let reply = self.engine.respond(&transcript).await?;
        if self.superseded(generation) {
            return Ok(None);
        }
        self.last_reply = Some(reply.clone());

        let speech = self.state.services.synthesizer.synthesize(&reply).await?;
        if self.superseded(generation) {
            return Ok(None);
        }

        let lease = self.state.assets.publish(speech);
        let url = lease.url(self.state.public_url());
        let handle = self
            .shared
            .playback
            .start(&url, lease)
            .await
            .map_err(|e| TurnError::upstream(Stage::Playback, e.to_string()))?;

        let still_active = self.shared.playback.active().await.as_ref() == Some(&handle);
        let placed = if self.shared.correlate_playback && still_active {
            self.shared.advance(generation, Phase::Playing)
        } else {
            self.shared.settle(generation)
        };
        if !placed {
            // Barge-in or close landed while playback was starting.
            self.shared.playback.stop(&handle).await;
            return Ok(None);
        }

        Ok(Some(ConversationTurn {
            transcript,
            reply,
            playback_id: Some(handle.to_string()),
        }))
    }

    fn superseded(&self, generation: u64) -> bool {
        self.shared.is_closed() || self.shared.generation() != generation
    }

    /// Materialize, transcribe, and delete the utterance asset.
    async fn transcribe(&self, utterance: &Utterance) -> Result<String, TurnError> {
        let transcriber = &self.state.services.transcriber;
        let asset = utterance
            .materialize(self.state.temp_dir(), transcriber.max_upload_bytes())
            .await?;
        let result = transcriber.transcribe(&asset).await;
        if let Err(e) = asset.close() {
            warn!(call_id = %self.shared.call_id, error = %e, "Failed to delete utterance asset");
        }
        result
    }

    /// Speech flushed at teardown is transcribed for the log but not answered.
    async fn flush_after_close(&self, utterance: &Utterance) {
        match self.transcribe(utterance).await {
            Ok(transcript) => {
                info!(call_id = %self.shared.call_id, seq = utterance.seq(), %transcript, "Final transcript")
            }
            Err(e) => {
                warn!(call_id = %self.shared.call_id, kind = e.kind(), error = %e, "Final flush failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_rejects_empty_and_punctuation() {
        assert_eq!(validate_transcript("", None, None), Err(Rejection::Empty));
        assert_eq!(validate_transcript("   \n", None, None), Err(Rejection::Empty));
        assert_eq!(validate_transcript("...", None, None), Err(Rejection::PunctuationOnly));
        assert_eq!(validate_transcript("?!", None, None), Err(Rejection::PunctuationOnly));
    }

    #[test]
    fn test_validation_rejects_duplicate() {
        assert_eq!(validate_transcript("hello", None, None), Ok(()));
        assert_eq!(
            validate_transcript("hello", Some("hello"), None),
            Err(Rejection::Duplicate)
        );
        assert_eq!(
            validate_transcript("Hello.", Some("hello"), None),
            Err(Rejection::Duplicate)
        );
        assert_eq!(validate_transcript("hello there", Some("hello"), None), Ok(()));
    }

    #[test]
    fn test_validation_rejects_echo_of_reply() {
        let reply = "We are open from nine to five on weekdays.";
        assert_eq!(
            validate_transcript("we are open from nine to five", None, Some(reply)),
            Err(Rejection::Echo)
        );
        // Short common words are not treated as echo.
        assert_eq!(validate_transcript("five", None, Some(reply)), Ok(()));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello,   World! "), "hello world");
        assert_eq!(normalize("..."), "");
        assert_eq!(normalize("Érase una VEZ"), "érase una vez");
    }

    #[test]
    fn test_duplicate_ignores_non_ascii_case() {
        assert_eq!(
            validate_transcript("Érase una vez", Some("érase una vez"), None),
            Err(Rejection::Duplicate)
        );
    }
}
