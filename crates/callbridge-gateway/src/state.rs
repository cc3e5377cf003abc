//! Gateway shared state.

use std::path::PathBuf;
use std::sync::Arc;

use callbridge_core::config::Config;
use callbridge_core::error::{CallbridgeError, Result};
use callbridge_media::{Clock, MonotonicClock, TranscriptionClient, WhisperTranscriber};
use callbridge_providers::{ConversationEngine, DialogueBackend, RetryPolicy, backend_from_config};
use callbridge_telephony::CallControl;
use callbridge_telephony::telnyx::TelnyxCallControl;
use callbridge_tts::{SynthesisClient, synthesizer_from_config};

use crate::assets::AssetStore;
use crate::registry::CallSessionRegistry;

/// External collaborators every call session uses.
#[derive(Clone)]
pub struct Services {
    pub transcriber: TranscriptionClient,
    pub dialogue: Arc<dyn DialogueBackend>,
    pub retry: RetryPolicy,
    pub max_dialogue_chars: usize,
    pub synthesizer: SynthesisClient,
    pub call_control: Arc<dyn CallControl>,
}

impl Services {
    /// Build the configured providers. Fails on the first missing credential.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transcription = config.transcription();
        let stt = WhisperTranscriber::from_config(&transcription).ok_or_else(|| {
            CallbridgeError::Config("No transcription API key configured".into())
        })?;

        let assistant = config.assistant();
        let dialogue = backend_from_config(&assistant)?;

        let tts = config.tts();
        let synthesizer = synthesizer_from_config(&tts)
            .ok_or_else(|| CallbridgeError::Config("No TTS API key configured".into()))?;

        let telephony = config.telephony();
        let call_control = TelnyxCallControl::from_config(&telephony).ok_or_else(|| {
            CallbridgeError::Config("No telephony API key configured".into())
        })?;

        Ok(Self {
            transcriber: TranscriptionClient::new(Arc::new(stt), transcription.max_upload_bytes),
            dialogue,
            retry: RetryPolicy::from_config(&assistant),
            max_dialogue_chars: assistant.max_input_chars,
            synthesizer: SynthesisClient::from_config(synthesizer, &tts),
            call_control: Arc::new(call_control),
        })
    }

    /// A fresh engine for one call.
    pub fn conversation_engine(&self) -> ConversationEngine {
        ConversationEngine::new(self.dialogue.clone(), self.retry, self.max_dialogue_chars)
    }
}

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub services: Services,
    pub registry: CallSessionRegistry,
    pub assets: AssetStore,
    pub clock: Arc<dyn Clock>,
    public_url: String,
    temp_dir: PathBuf,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, services: Services) -> Self {
        Self {
            public_url: config.public_url(),
            temp_dir: config.temp_dir(),
            config,
            services,
            registry: CallSessionRegistry::new(),
            assets: AssetStore::new(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let services = Services::from_config(&config)?;
        Ok(Self::new(config, services))
    }

    /// Replace the silence-timing clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    pub fn temp_dir(&self) -> &std::path::Path {
        &self.temp_dir
    }
}
