//! Voice agent wire records
//!
//! Every text message on the connection is a JSON object tagged by `type`.
//! Outbound audio travels separately as binary PCM16 frames.

use crate::config::{AgentOptions, SessionConfig};
use crate::events::WireMessage;
use serde::{Deserialize, Serialize};

const PCM_ENCODING: &str = "linear16";
const SPEECH_PROVIDER: &str = "deepgram";

/// Messages sent to the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Handshake; sent once right after the connection opens
    Settings(Settings),
    InjectUserMessage { content: String },
    UpdatePrompt { prompt: String },
    Interrupt,
    KeepAlive,
    UpdateSpeak { speak: SpeakConfig },
    InjectAgentMessage { message: String },
}

impl ClientMessage {
    pub fn settings(options: &AgentOptions, config: &SessionConfig) -> Self {
        ClientMessage::Settings(Settings {
            audio: AudioSettings {
                input: AudioEncoding {
                    encoding: PCM_ENCODING.to_string(),
                    sample_rate: config.input_rate,
                    container: None,
                },
                output: AudioEncoding {
                    encoding: PCM_ENCODING.to_string(),
                    sample_rate: config.output_rate,
                    container: Some(config.output_container.clone()),
                },
            },
            agent: AgentSettings {
                language: options.language.clone(),
                listen: ListenConfig {
                    provider: Provider::new(SPEECH_PROVIDER, &options.listen_model),
                },
                think: ThinkConfig {
                    provider: Provider::new(&options.think_provider, &options.think_model),
                    prompt: options.prompt.clone(),
                },
                speak: SpeakConfig::voice(&options.voice),
                greeting: options.greeting.clone(),
            },
        })
    }

    /// The `type` tag, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Settings(_) => "Settings",
            ClientMessage::InjectUserMessage { .. } => "InjectUserMessage",
            ClientMessage::UpdatePrompt { .. } => "UpdatePrompt",
            ClientMessage::Interrupt => "Interrupt",
            ClientMessage::KeepAlive => "KeepAlive",
            ClientMessage::UpdateSpeak { .. } => "UpdateSpeak",
            ClientMessage::InjectAgentMessage { .. } => "InjectAgentMessage",
        }
    }

    pub fn to_wire(&self) -> serde_json::Result<WireMessage> {
        Ok(WireMessage::Text(serde_json::to_string(self)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub audio: AudioSettings,
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioSettings {
    pub input: AudioEncoding,
    pub output: AudioEncoding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioEncoding {
    pub encoding: String,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSettings {
    pub language: String,
    pub listen: ListenConfig,
    pub think: ThinkConfig,
    pub speak: SpeakConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provider {
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
}

impl Provider {
    pub fn new(kind: &str, model: &str) -> Self {
        Self {
            kind: kind.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenConfig {
    pub provider: Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThinkConfig {
    pub provider: Provider,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakConfig {
    pub provider: Provider,
}

impl SpeakConfig {
    pub fn voice(voice: &str) -> Self {
        Self {
            provider: Provider::new(SPEECH_PROVIDER, voice),
        }
    }
}

/// Speaker of a conversation line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "agent")]
    Assistant,
}

/// Messages received from the agent
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    Welcome {
        #[serde(default)]
        request_id: Option<String>,
    },
    SettingsApplied,
    UserStartedSpeaking,
    UserStoppedSpeaking,
    ConversationText {
        role: Role,
        content: String,
    },
    InterimTranscript {
        content: String,
        #[serde(default)]
        is_final: bool,
    },
    AgentThinking,
    AgentStartedSpeaking,
    AgentAudioDone,
    /// Base64 audio carried inline in a text record
    Audio {
        data: String,
    },
    Error {
        #[serde(default, alias = "message")]
        description: String,
        #[serde(default)]
        code: Option<serde_json::Value>,
    },
    Warning {
        #[serde(default, alias = "message")]
        description: String,
        #[serde(default)]
        code: Option<serde_json::Value>,
    },
    PromptUpdated,
    SpeakUpdated,
    InjectionRefused {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
