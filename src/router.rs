//! Protocol router
//!
//! Turns one inbound transport event into one `Dispatch` for the session task
//! to act on. Routing itself has no side effects beyond logging, so message
//! order is whatever order the session feeds events in.

use crate::events::{AudioFrame, TransportEvent};
use crate::protocol::{Role, ServerEvent};
use crate::state::AgentState;
use base64::engine::general_purpose;
use base64::Engine;
use tracing::{debug, info, trace, warn};

/// Playback callback fired alongside an agent state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEdge {
    Started,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Audio for the playback pipeline
    PlayAudio(AudioFrame),
    Agent {
        state: AgentState,
        /// Clear local playback before switching state
        interrupt_playback: bool,
        edge: Option<PlaybackEdge>,
    },
    /// Final line of the conversation
    ConversationText { role: Role, text: String },
    InterimTranscript { text: String, is_final: bool },
    RemoteError {
        code: Option<String>,
        message: String,
        warning: bool,
    },
    Closed { code: Option<u16>, reason: String },
    TransportFailed(String),
    Ignore,
}

#[derive(Debug, Clone, Copy)]
pub struct Router {
    /// Rate of inbound PCM frames
    output_rate: u32,
}

impl Router {
    pub fn new(output_rate: u32) -> Self {
        Self { output_rate }
    }

    pub fn route(&self, event: TransportEvent) -> Dispatch {
        match event {
            TransportEvent::Binary(data) => {
                trace!("Received {} bytes of agent audio", data.len());
                Dispatch::PlayAudio(AudioFrame::new(data, self.output_rate))
            }
            TransportEvent::Text(text) => match ServerEvent::parse(&text) {
                Ok(event) => self.route_event(event),
                Err(e) => {
                    warn!("Ignoring malformed record: {} ({})", e, truncate(&text, 120));
                    Dispatch::Ignore
                }
            },
            TransportEvent::Closed { code, reason } => Dispatch::Closed { code, reason },
            TransportEvent::Error(message) => Dispatch::TransportFailed(message),
        }
    }

    fn route_event(&self, event: ServerEvent) -> Dispatch {
        match event {
            ServerEvent::Welcome { request_id } => {
                info!("👋 Agent welcome (request id {:?})", request_id);
                Dispatch::Ignore
            }
            ServerEvent::SettingsApplied => {
                info!("✅ Agent settings applied");
                Dispatch::Ignore
            }
            ServerEvent::UserStartedSpeaking => Dispatch::Agent {
                state: AgentState::Listening,
                interrupt_playback: true,
                edge: None,
            },
            ServerEvent::UserStoppedSpeaking => {
                debug!("User stopped speaking");
                Dispatch::Ignore
            }
            ServerEvent::ConversationText { role, content } => Dispatch::ConversationText { role, text: content },
            ServerEvent::InterimTranscript { content, is_final } => Dispatch::InterimTranscript {
                text: content,
                is_final,
            },
            ServerEvent::AgentThinking => Dispatch::Agent {
                state: AgentState::Thinking,
                interrupt_playback: false,
                edge: None,
            },
            ServerEvent::AgentStartedSpeaking => Dispatch::Agent {
                state: AgentState::Speaking,
                interrupt_playback: false,
                edge: Some(PlaybackEdge::Started),
            },
            ServerEvent::AgentAudioDone => Dispatch::Agent {
                state: AgentState::Listening,
                interrupt_playback: false,
                edge: Some(PlaybackEdge::Ended),
            },
            ServerEvent::Audio { data } => match general_purpose::STANDARD.decode(data.as_bytes()) {
                Ok(bytes) => Dispatch::PlayAudio(AudioFrame::new(bytes, self.output_rate)),
                Err(e) => {
                    warn!("Ignoring inline audio with bad base64: {}", e);
                    Dispatch::Ignore
                }
            },
            ServerEvent::Error { description, code } => Dispatch::RemoteError {
                code: code.map(code_text),
                message: description,
                warning: false,
            },
            ServerEvent::Warning { description, code } => Dispatch::RemoteError {
                code: code.map(code_text),
                message: description,
                warning: true,
            },
            ServerEvent::PromptUpdated => {
                debug!("Prompt updated");
                Dispatch::Ignore
            }
            ServerEvent::SpeakUpdated => {
                debug!("Voice updated");
                Dispatch::Ignore
            }
            ServerEvent::InjectionRefused { message } => {
                warn!("Injection refused: {}", message);
                Dispatch::Ignore
            }
            ServerEvent::Unknown => {
                debug!("Ignoring unrecognized record type");
                Dispatch::Ignore
            }
        }
    }
}

fn code_text(code: serde_json::Value) -> String {
    match code {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
