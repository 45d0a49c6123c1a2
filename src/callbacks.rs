//! Caller-supplied event callbacks
//!
//! Callbacks run synchronously on whichever thread dispatches the event
//! (usually the session task) and must return quickly.

use crate::session::SessionError;
use crate::state::{AgentState, ConnectionState};
use std::fmt;
use std::sync::Arc;

pub type ConnectionStateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type AgentStateCallback = Arc<dyn Fn(AgentState) + Send + Sync>;
/// Receives (text, is_final).
pub type TranscriptCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;
pub type AgentUtteranceCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type PlaybackCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Callbacks {
    connection_state: Option<ConnectionStateCallback>,
    agent_state: Option<AgentStateCallback>,
    user_transcript: Option<TranscriptCallback>,
    agent_utterance: Option<AgentUtteranceCallback>,
    playback_start: Option<PlaybackCallback>,
    playback_end: Option<PlaybackCallback>,
    error: Option<ErrorCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connection_state(mut self, f: impl Fn(ConnectionState) + Send + Sync + 'static) -> Self {
        self.connection_state = Some(Arc::new(f));
        self
    }

    pub fn on_agent_state(mut self, f: impl Fn(AgentState) + Send + Sync + 'static) -> Self {
        self.agent_state = Some(Arc::new(f));
        self
    }

    pub fn on_user_transcript(mut self, f: impl Fn(&str, bool) + Send + Sync + 'static) -> Self {
        self.user_transcript = Some(Arc::new(f));
        self
    }

    pub fn on_agent_utterance(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.agent_utterance = Some(Arc::new(f));
        self
    }

    pub fn on_playback_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.playback_start = Some(Arc::new(f));
        self
    }

    pub fn on_playback_end(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.playback_end = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&SessionError) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    pub(crate) fn connection_state(&self, state: ConnectionState) {
        if let Some(cb) = &self.connection_state {
            cb(state);
        }
    }

    pub(crate) fn agent_state(&self, state: AgentState) {
        if let Some(cb) = &self.agent_state {
            cb(state);
        }
    }

    pub(crate) fn user_transcript(&self, text: &str, is_final: bool) {
        if let Some(cb) = &self.user_transcript {
            cb(text, is_final);
        }
    }

    pub(crate) fn agent_utterance(&self, text: &str) {
        if let Some(cb) = &self.agent_utterance {
            cb(text);
        }
    }

    pub(crate) fn playback_start(&self) {
        if let Some(cb) = &self.playback_start {
            cb();
        }
    }

    pub(crate) fn playback_end(&self) {
        if let Some(cb) = &self.playback_end {
            cb();
        }
    }

    pub(crate) fn error(&self, error: &SessionError) {
        if let Some(cb) = &self.error {
            cb(error);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("connection_state", &self.connection_state.is_some())
            .field("agent_state", &self.agent_state.is_some())
            .field("user_transcript", &self.user_transcript.is_some())
            .field("agent_utterance", &self.agent_utterance.is_some())
            .field("playback_start", &self.playback_start.is_some())
            .field("playback_end", &self.playback_end.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}
