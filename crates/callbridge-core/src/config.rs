//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Callbridge configuration.
///
/// Every section is optional; accessors fall back to the section defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephony: Option<TelephonyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad: Option<VadConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant: Option<AssistantConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Public HTTPS base URL the telephony platform can reach (webhooks, reply assets).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// Public WSS base URL for media streaming. Defaults to `public_url` with a ws scheme.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

fn default_port() -> u16 {
    3000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            public_url: None,
            stream_url: None,
        }
    }
}

/// Telephony call-control provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Provider id (default: "telnyx").
    #[serde(default = "default_telephony_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    /// Greeting spoken once the call is answered. Streaming starts when it ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,

    #[serde(default = "default_greeting_voice")]
    pub greeting_voice: String,

    #[serde(default = "default_greeting_language")]
    pub greeting_language: String,

    #[serde(default = "default_stream_track")]
    pub stream_track: String,

    /// Wait for playback-ended notifications before returning to idle.
    #[serde(default = "default_true")]
    pub playback_correlation: bool,
}

fn default_telephony_provider() -> String {
    "telnyx".into()
}

fn default_greeting_voice() -> String {
    "male".into()
}

fn default_greeting_language() -> String {
    "en-US".into()
}

fn default_stream_track() -> String {
    "inbound_track".into()
}

fn default_true() -> bool {
    true
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            provider: default_telephony_provider(),
            api_key: None,
            api_key_env: None,
            api_base: None,
            greeting: None,
            greeting_voice: default_greeting_voice(),
            greeting_language: default_greeting_language(),
            stream_track: default_stream_track(),
            playback_correlation: true,
        }
    }
}

impl TelephonyConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| env_fallback("TELNYX_API_KEY"))
    }
}

/// Voice activity detection tuning.
///
/// `threshold` is an RMS level on the 16-bit linear scale of decoded samples.
/// Calibrate it against recorded calls; line noise on PSTN legs typically sits
/// well under 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_vad_threshold")]
    pub threshold: f64,

    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u64,

    #[serde(default = "default_min_speech_duration_ms")]
    pub min_speech_duration_ms: u64,

    /// Number of recent frame energies averaged for speech onset.
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,

    /// Frames with fewer payload bytes are dropped before analysis.
    #[serde(default = "default_min_frame_bytes")]
    pub min_frame_bytes: usize,
}

fn default_vad_threshold() -> f64 {
    300.0
}

fn default_silence_duration_ms() -> u64 {
    1500
}

fn default_min_speech_duration_ms() -> u64 {
    300
}

fn default_smoothing_window() -> usize {
    3
}

fn default_min_frame_bytes() -> usize {
    10
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: default_vad_threshold(),
            silence_duration_ms: default_silence_duration_ms(),
            min_speech_duration_ms: default_min_speech_duration_ms(),
            smoothing_window: default_smoothing_window(),
            min_frame_bytes: default_min_frame_bytes(),
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "openai" or "groq" (default: "openai").
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-1").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// ISO 639-1 language hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_transcription_provider() -> String {
    "openai".into()
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            api_key: None,
            api_key_env: None,
            model: None,
            language: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        let fallback = match self.provider.as_str() {
            "groq" => "GROQ_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| env_fallback(fallback))
    }
}

/// Which dialogue API drives the conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueBackendKind {
    /// Thread/run based assistants API (asynchronous turns, polled).
    #[default]
    Assistants,
    /// Chat completions (synchronous turns, history sent each time).
    Chat,
}

/// Conversational backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub backend: DialogueBackendKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id_env: Option<String>,

    /// Model for the chat backend (default: "gpt-4o-mini").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// System prompt for the chat backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    #[serde(default = "default_poll_base_delay_ms")]
    pub poll_base_delay_ms: u64,

    #[serde(default = "default_poll_step_ms")]
    pub poll_step_ms: u64,

    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_max_poll_attempts() -> u32 {
    15
}

fn default_poll_base_delay_ms() -> u64 {
    1000
}

fn default_poll_step_ms() -> u64 {
    500
}

fn default_max_input_chars() -> usize {
    4000
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            backend: DialogueBackendKind::default(),
            api_key: None,
            api_key_env: None,
            assistant_id: None,
            assistant_id_env: None,
            model: None,
            base_url: None,
            system_prompt: None,
            max_poll_attempts: default_max_poll_attempts(),
            poll_base_delay_ms: default_poll_base_delay_ms(),
            poll_step_ms: default_poll_step_ms(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl AssistantConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| env_fallback("OPENAI_API_KEY"))
    }

    pub fn resolve_assistant_id(&self) -> Option<String> {
        resolve_secret_field(&self.assistant_id, &self.assistant_id_env)
            .or_else(|| env_fallback("ASSISTANT_ID"))
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// TTS provider: "openai" (default) or "elevenlabs".
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model id (e.g. "tts-1", "eleven_turbo_v2").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Voice name or id (e.g. "alloy").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(default = "default_max_tts_input_chars")]
    pub max_input_chars: usize,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_tts_provider() -> String {
    "openai".into()
}

fn default_max_tts_input_chars() -> usize {
    4096
}

fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            api_key: None,
            api_key_env: None,
            model: None,
            voice: None,
            max_input_chars: default_max_tts_input_chars(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        let fallback = match self.provider.as_str() {
            "elevenlabs" => "ELEVENLABS_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| env_fallback(fallback))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Directory for per-turn temporary audio assets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "callbridge_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

fn env_fallback(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PATTERN
        .get_or_init(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern compiles"));
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::CallbridgeError::Io)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5), substituting `${ENV_VAR}` references first.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted).map_err(|e| crate::error::CallbridgeError::Config(e.to_string()))
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }

    pub fn telephony(&self) -> TelephonyConfig {
        self.telephony.clone().unwrap_or_default()
    }

    pub fn vad(&self) -> VadConfig {
        self.vad.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn assistant(&self) -> AssistantConfig {
        self.assistant.clone().unwrap_or_default()
    }

    pub fn tts(&self) -> TtsConfig {
        self.tts.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Gateway port.
    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    /// Public HTTP base URL, without a trailing slash.
    pub fn public_url(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.public_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{}", self.gateway_port()))
            .trim_end_matches('/')
            .to_string()
    }

    /// Public WebSocket base URL, without a trailing slash.
    pub fn stream_url(&self) -> String {
        if let Some(url) = self.gateway.as_ref().and_then(|g| g.stream_url.clone()) {
            return url.trim_end_matches('/').to_string();
        }
        let public = self.public_url();
        if let Some(rest) = public.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = public.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            public
        }
    }

    /// Directory for per-turn temporary audio assets.
    pub fn temp_dir(&self) -> PathBuf {
        self.media
            .as_ref()
            .and_then(|m| m.temp_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("callbridge"))
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.telephony().resolve_api_key().is_none() {
            warnings.push("Telephony provider has no API key configured".to_string());
        }
        if self.transcription().resolve_api_key().is_none() {
            warnings.push("Transcription provider has no API key configured".to_string());
        }
        if self.tts().resolve_api_key().is_none() {
            warnings.push("TTS provider has no API key configured".to_string());
        }

        let assistant = self.assistant();
        if assistant.resolve_api_key().is_none() {
            warnings.push("Assistant backend has no API key configured".to_string());
        }
        if assistant.backend == DialogueBackendKind::Assistants
            && assistant.resolve_assistant_id().is_none()
        {
            errors.push("Assistants backend requires an assistant_id".to_string());
        }
        if assistant.max_poll_attempts == 0 {
            errors.push("assistant.max_poll_attempts must be at least 1".to_string());
        }

        if self.gateway.as_ref().and_then(|g| g.public_url.as_ref()).is_none() {
            warnings.push(
                "gateway.public_url is not set; the telephony platform cannot fetch reply audio"
                    .to_string(),
            );
        }

        let vad = self.vad();
        if vad.threshold <= 0.0 {
            errors.push("vad.threshold must be positive".to_string());
        }
        if vad.silence_duration_ms == 0 {
            errors.push("vad.silence_duration_ms must be positive".to_string());
        }
        if vad.smoothing_window == 0 {
            errors.push("vad.smoothing_window must be at least 1".to_string());
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Callbridge data: `~/.callbridge/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".callbridge")
}
