//! Session and agent configuration
//!
//! `AgentOptions` is the per-connect record describing the remote agent.
//! `SessionConfig` holds the transport and audio constants. Both have a
//! `Default` and can be overlaid from `RHOVOICE_*` environment variables.

use crate::capture::{CaptureConfig, DEFAULT_BLOCK_SIZE};
use crate::filter::FilterConfig;
use crate::playback::PlaybackConfig;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_URL: &str = "wss://agent.deepgram.com/v1/agent/converse";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// What the remote agent should be; fixed for the lifetime of one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOptions {
    /// Speech recognition model on the remote side
    pub listen_model: String,
    pub think_provider: String,
    /// Dialogue model
    pub think_model: String,
    /// Speech synthesis voice
    pub voice: String,
    pub language: String,
    /// Spoken by the agent as soon as the conversation starts
    pub greeting: Option<String>,
    /// Behavioural instructions, passed through verbatim
    pub prompt: String,
    /// Playback speed multiplier, 1.0 is normal
    pub playback_speed: f32,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            listen_model: "nova-3".to_string(),
            think_provider: "open_ai".to_string(),
            think_model: "gpt-4o-mini".to_string(),
            voice: "aura-2-thalia-en".to_string(),
            language: "en".to_string(),
            greeting: None,
            prompt: "You are a friendly voice assistant. Keep your answers short and conversational."
                .to_string(),
            playback_speed: 1.0,
        }
    }
}

impl AgentOptions {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay `RHOVOICE_*` values returned by `lookup` on the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();
        if let Some(v) = lookup("RHOVOICE_LISTEN_MODEL") {
            options.listen_model = v;
        }
        if let Some(v) = lookup("RHOVOICE_THINK_PROVIDER") {
            options.think_provider = v;
        }
        if let Some(v) = lookup("RHOVOICE_THINK_MODEL") {
            options.think_model = v;
        }
        if let Some(v) = lookup("RHOVOICE_VOICE") {
            options.voice = v;
        }
        if let Some(v) = lookup("RHOVOICE_LANGUAGE") {
            options.language = v;
        }
        if let Some(v) = lookup("RHOVOICE_GREETING") {
            options.greeting = Some(v).filter(|g| !g.is_empty());
        }
        if let Some(v) = lookup("RHOVOICE_PROMPT") {
            options.prompt = v;
        }
        if let Some(v) = parse(&lookup, "RHOVOICE_PLAYBACK_SPEED")? {
            options.playback_speed = v;
        }
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.playback_speed.is_finite() || self.playback_speed <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "playback speed must be a positive number, got {}",
                self.playback_speed
            )));
        }
        for (name, value) in [
            ("listen model", &self.listen_model),
            ("think provider", &self.think_provider),
            ("think model", &self.think_model),
            ("voice", &self.voice),
            ("language", &self.language),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }
}

/// Transport and audio constants
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub url: String,
    /// Rate of the audio we send
    pub input_rate: u32,
    /// Rate of the audio the remote side sends back
    pub output_rate: u32,
    /// Container requested for remote audio ("none" for bare PCM)
    pub output_container: String,
    pub block_size: usize,
    pub keepalive: Duration,
    pub filter: FilterConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            input_rate: 16_000,
            output_rate: 24_000,
            output_container: "none".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            keepalive: Duration::from_secs(8),
            filter: FilterConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("RHOVOICE_URL") {
            config.url = v;
        }
        if let Some(v) = parse(&lookup, "RHOVOICE_INPUT_RATE")? {
            config.input_rate = v;
        }
        if let Some(v) = parse(&lookup, "RHOVOICE_OUTPUT_RATE")? {
            config.output_rate = v;
        }
        if let Some(v) = parse(&lookup, "RHOVOICE_BLOCK_SIZE")? {
            config.block_size = v;
        }
        if let Some(secs) = parse::<u64>(&lookup, "RHOVOICE_KEEPALIVE_SECS")? {
            config.keepalive = Duration::from_secs(secs);
        }
        if let Some(v) = parse(&lookup, "RHOVOICE_HIGHPASS_HZ")? {
            config.filter.highpass_hz = v;
        }
        if let Some(v) = parse(&lookup, "RHOVOICE_LOWPASS_HZ")? {
            config.filter.lowpass_hz = v;
        }
        if let Some(v) = parse(&lookup, "RHOVOICE_GAIN")? {
            config.filter.gain = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_rate == 0 || self.output_rate == 0 {
            return Err(ConfigError::Invalid("sample rates must be non-zero".to_string()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block size must be non-zero".to_string()));
        }
        if self.keepalive.is_zero() {
            return Err(ConfigError::Invalid("keep-alive interval must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_rate: self.input_rate,
            block_size: self.block_size,
        }
    }

    pub fn playback_config(&self, options: &AgentOptions) -> PlaybackConfig {
        PlaybackConfig {
            source_rate: self.output_rate,
            speed: options.playback_speed,
            filter: self.filter,
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
