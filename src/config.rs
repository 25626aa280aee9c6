//! # Configuration Management
//!
//! Loads the service configuration from several layered sources:
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. An optional `config.toml` next to the binary
//! 3. `APP_`-prefixed environment variables (`APP_VOICE__MODEL` → `voice.model`)
//! 4. Well-known platform variables (`HOST`, `PORT`) and credentials
//!    (`GEMINI_API_KEY`/`API_KEY`, `MEMOS_API_KEY`, `MEMOS_USER_ID`)
//!
//! Later sources override earlier ones. Credentials are never written back out
//! through the HTTP API; see `redacted()`.
//!
//! ## Key Rust Concepts:
//! - **Serde**: `#[derive(Serialize, Deserialize)]` lets the `config` crate build
//!   these structs from TOML files and environment variables
//! - **Result<T>**: every loading step can fail and is propagated with `?`

use crate::session::instruction::Voice;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Largest capture frame, in samples (about four seconds at 16 kHz).
pub const MAX_CAPTURE_BLOCK_SIZE: usize = 1 << 16;

/// Largest outbound queue, in frames.
pub const MAX_OUTBOUND_QUEUE_FRAMES: usize = 4096;

/// Main configuration structure that holds all application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub voice: VoiceConfig,
    pub memory: MemoryConfig,
    pub prompts: PromptConfig,
}

/// HTTP control surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings for the live duplex voice session.
///
/// The two audio directions are independent streams with independent clocks:
/// microphone frames go out at `input_sample_rate`, synthesized speech comes
/// back at `output_sample_rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// WebSocket URL of the remote streaming endpoint
    pub endpoint_url: String,

    /// Model identifier sent in the setup message
    pub model: String,

    /// Voice used when a call does not ask for a specific one
    pub default_voice: String,

    /// API key appended to the endpoint URL
    pub api_key: Option<String>,

    /// Outbound (microphone) sample rate in Hz
    pub input_sample_rate: u32,

    /// Inbound (speech) sample rate in Hz
    pub output_sample_rate: u32,

    /// Samples per capture frame
    pub capture_block_size: usize,

    /// Frames that may wait for the network before new ones are dropped
    pub outbound_queue_frames: usize,
}

/// Remote memory/context store used to seed the session instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub user_id: String,

    /// Conversation searched for the context summary
    pub conversation_id: String,

    /// Conversation that saved messages are appended to
    pub save_conversation_id: String,

    /// Natural-language question whose answer becomes the Context Summary
    pub context_query: String,

    pub timeout_secs: u64,
}

/// Fixed text surrounding the Context Summary in the system instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub persona_preamble: String,
    pub clinical_focus: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only: the microphone is on this machine
                port: 8080,
            },
            voice: VoiceConfig {
                endpoint_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
                default_voice: Voice::default().as_str().to_string(),
                api_key: None,
                input_sample_rate: 16000,
                output_sample_rate: 24000,
                capture_block_size: 4096,
                outbound_queue_frames: 64,
            },
            memory: MemoryConfig {
                base_url: "https://memos.memtensor.cn/api/openmem/v1".to_string(),
                api_key: None,
                user_id: "local-user".to_string(),
                conversation_id: "global".to_string(),
                save_conversation_id: "health_context".to_string(),
                context_query: "Summarize the user's recent lab result trends and key health concerns".to_string(),
                timeout_secs: 10,
            },
            prompts: PromptConfig {
                persona_preamble: "You are the health record assistant. You have access to the patient's \
                    historical lab results. Answer as a professional and gentle physician's assistant. \
                    Memory context: "
                    .to_string(),
                clinical_focus: "Key focus: white blood cell dynamics, liver function and metabolic \
                    balance, and changes in the immune microenvironment such as the CD4/CD8 ratio."
                    .to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with priority order.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates nesting so that keys like
            // `input_sample_rate` survive: APP_VOICE__INPUT_SAMPLE_RATE
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("GEMINI_API_KEY").or_else(|_| env::var("API_KEY")) {
            settings = settings.set_override("voice.api_key", key)?;
        }

        if let Ok(key) = env::var("MEMOS_API_KEY") {
            settings = settings.set_override("memory.api_key", key)?;
        }

        if let Ok(user) = env::var("MEMOS_USER_ID") {
            settings = settings.set_override("memory.user_id", user)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate configuration values to ensure they make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.voice.input_sample_rate == 0 || self.voice.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rates must be greater than 0"));
        }

        if self.voice.capture_block_size == 0 || self.voice.capture_block_size > MAX_CAPTURE_BLOCK_SIZE {
            return Err(anyhow::anyhow!(
                "Capture block size must be between 1 and {}",
                MAX_CAPTURE_BLOCK_SIZE
            ));
        }

        if self.voice.outbound_queue_frames == 0 || self.voice.outbound_queue_frames > MAX_OUTBOUND_QUEUE_FRAMES {
            return Err(anyhow::anyhow!(
                "Outbound queue must hold between 1 and {} frames",
                MAX_OUTBOUND_QUEUE_FRAMES
            ));
        }

        if self.voice.default_voice.parse::<Voice>().is_err() {
            return Err(anyhow::anyhow!(
                "Unknown default voice '{}'",
                self.voice.default_voice
            ));
        }

        if self.memory.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Memory timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"voice": {"default_voice": "Puck"}}`.
    ///
    /// Only the listed fields can change at runtime. Sessions that are already
    /// live keep the settings they were started with.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(voice) = partial_config.get("voice") {
            if let Some(model) = voice.get("model").and_then(|v| v.as_str()) {
                self.voice.model = model.to_string();
            }
            if let Some(name) = voice.get("default_voice").and_then(|v| v.as_str()) {
                self.voice.default_voice = name.to_string();
            }
            if let Some(block) = voice.get("capture_block_size").and_then(|v| v.as_u64()) {
                self.voice.capture_block_size = usize::try_from(block).unwrap_or(usize::MAX);
            }
            if let Some(frames) = voice.get("outbound_queue_frames").and_then(|v| v.as_u64()) {
                self.voice.outbound_queue_frames = usize::try_from(frames).unwrap_or(usize::MAX);
            }
        }

        if let Some(memory) = partial_config.get("memory") {
            if let Some(query) = memory.get("context_query").and_then(|v| v.as_str()) {
                self.memory.context_query = query.to_string();
            }
            if let Some(timeout) = memory.get("timeout_secs").and_then(|v| v.as_u64()) {
                self.memory.timeout_secs = timeout;
            }
        }

        if let Some(prompts) = partial_config.get("prompts") {
            if let Some(preamble) = prompts.get("persona_preamble").and_then(|v| v.as_str()) {
                self.prompts.persona_preamble = preamble.to_string();
            }
            if let Some(focus) = prompts.get("clinical_focus").and_then(|v| v.as_str()) {
                self.prompts.clinical_focus = focus.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Copy of the configuration that is safe to show to clients.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.voice.api_key = copy.voice.api_key.as_ref().map(|_| "***".to_string());
        copy.memory.api_key = copy.memory.api_key.as_ref().map(|_| "***".to_string());
        copy
    }
}
