//! Voice dialogue session
//!
//! `Session` is the caller-facing handle. `connect` spawns one session task
//! that owns the devices, both pipelines and the connection for the lifetime
//! of that connection. All agent state changes, outbound sends and playback
//! commands happen on that task, in the order the events arrived. The handle
//! talks to it over a control channel and reads state through `Shared`.

use crate::callbacks::Callbacks;
use crate::capture::{CaptureGate, CapturePipeline};
use crate::config::{AgentOptions, ConfigError, SessionConfig};
use crate::device::{AudioBackend, AudioError, InputDevice, OutputDevice};
use crate::events::{AudioFrame, CaptureEvent, PlaybackStatus, TransportEvent, WireMessage};
use crate::playback::PlaybackPipeline;
use crate::protocol::{ClientMessage, Role, SpeakConfig};
use crate::router::{Dispatch, PlaybackEdge, Router};
use crate::state::{AgentState, ConnectionState, StateMachine};
use crate::transport::{ConnectRequest, Connection, Connector, TokenProvider, TransportError};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Errors surfaced to the caller, either returned or passed to the error callback
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Audio device error: {0}")]
    Device(#[from] AudioError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error or warning record sent by the agent
    #[error("Agent reported: {message}")]
    Remote {
        code: Option<String>,
        message: String,
        warning: bool,
    },

    #[error("Connection closed abnormally (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("Failed to encode {message}: {reason}")]
    Encode { message: &'static str, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// One final line of the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
}

enum Control {
    Interrupt,
    InjectUser(String),
    UpdatePrompt(String),
    UpdateVoice(String),
    InjectAgent(String),
    SetVolume(f32),
    Disconnect,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State visible to both the handle and the session task
struct Shared {
    state: Mutex<StateMachine>,
    callbacks: Callbacks,
    gate: CaptureGate,
    transcript: Mutex<Vec<TranscriptEntry>>,
    playback: Mutex<Option<watch::Receiver<PlaybackStatus>>>,
    volume: AtomicU32,
}

impl Shared {
    fn set_connection(&self, next: ConnectionState) {
        let result = lock(&self.state).set_connection(next);
        match result {
            Ok(true) => {
                info!("🔌 Connection {}", next);
                self.callbacks.connection_state(next);
            }
            Ok(false) => {}
            Err(e) => warn!("{}", e),
        }
    }

    fn set_agent(&self, next: AgentState) {
        let mut state = lock(&self.state);
        match state.set_agent(next) {
            Ok(true) => {
                // Mute before anyone can observe the new state
                self.gate.set_muted(next.mutes_capture());
                drop(state);
                debug!("🤖 Agent {}", next);
                self.callbacks.agent_state(next);
            }
            Ok(false) => {}
            Err(e) => warn!("Ignoring agent state change: {}", e),
        }
    }

    fn report(&self, error: SessionError) {
        match &error {
            SessionError::Remote { warning: true, .. } => warn!("⚠️ {}", error),
            _ => error!("❌ {}", error),
        }
        self.callbacks.error(&error);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::SeqCst))
    }
}

/// Handle to a voice dialogue with the remote agent
pub struct Session {
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    config: SessionConfig,
    shared: Arc<Shared>,
    control: Option<mpsc::UnboundedSender<Control>>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        config: SessionConfig,
        callbacks: Callbacks,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(StateMachine::new()),
            callbacks,
            gate: CaptureGate::new(),
            transcript: Mutex::new(Vec::new()),
            playback: Mutex::new(None),
            volume: AtomicU32::new(config.filter.gain.to_bits()),
        });
        Self {
            backend,
            connector,
            tokens,
            config,
            shared,
            control: None,
            task: None,
        }
    }

    /// Start connecting and return immediately; progress is reported through
    /// the connection-state callback. Does nothing if already connecting or
    /// connected. Must be called from within a Tokio runtime.
    pub fn connect(&mut self, options: AgentOptions) -> Result<()> {
        options.validate()?;
        if self.connection_state().is_active() {
            debug!("connect() ignored, session is {}", self.connection_state());
            return Ok(());
        }

        // A task that ended on its own has already released everything
        self.task = None;
        lock(&self.shared.transcript).clear();
        self.shared.set_connection(ConnectionState::Connecting);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let task = SessionTask {
            backend: self.backend.clone(),
            connector: self.connector.clone(),
            tokens: self.tokens.clone(),
            config: self.config.clone(),
            options,
            shared: self.shared.clone(),
        };
        self.control = Some(control_tx);
        self.task = Some(tokio::spawn(task.run(control_rx)));
        Ok(())
    }

    /// Close the connection and release every device, timer and task.
    /// Safe to call in any state, including mid-handshake.
    pub async fn disconnect(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Disconnect);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Session task failed: {}", e);
            }
        }
        self.shared.set_agent(AgentState::Idle);
        self.shared.set_connection(ConnectionState::Disconnected);
    }

    /// Ask the agent to stop talking and drop any audio still queued locally.
    pub fn interrupt(&self) -> Result<()> {
        self.command(Control::Interrupt)
    }

    /// Send `text` as if the user had said it.
    pub fn inject_message(&self, text: impl Into<String>) -> Result<()> {
        self.command(Control::InjectUser(text.into()))
    }

    /// Replace the agent's instructions for the rest of the conversation.
    pub fn update_prompt(&self, prompt: impl Into<String>) -> Result<()> {
        self.command(Control::UpdatePrompt(prompt.into()))
    }

    pub fn update_voice(&self, voice: impl Into<String>) -> Result<()> {
        self.command(Control::UpdateVoice(voice.into()))
    }

    /// Make the agent say `text`.
    pub fn inject_agent_message(&self, text: impl Into<String>) -> Result<()> {
        self.command(Control::InjectAgent(text.into()))
    }

    /// Playback gain; kept across reconnects.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_finite() { volume.max(0.0) } else { 1.0 };
        self.shared.volume.store(volume.to_bits(), Ordering::SeqCst);
        if let Some(control) = &self.control {
            let _ = control.send(Control::SetVolume(volume));
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.shared.state).connection()
    }

    pub fn agent_state(&self) -> AgentState {
        lock(&self.shared.state).agent()
    }

    /// Final conversation lines of the current (or last) connection
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        lock(&self.shared.transcript).clone()
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        lock(&self.shared.playback)
            .as_ref()
            .map(|status| *status.borrow())
            .unwrap_or_default()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn command(&self, cmd: Control) -> Result<()> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        match &self.control {
            Some(control) => control.send(cmd).map_err(|_| SessionError::NotConnected),
            None => Err(SessionError::NotConnected),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The task tears itself down; nobody is left to await it
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Disconnect);
        }
    }
}

enum Exit {
    Requested,
    Closed { code: Option<u16>, reason: String },
    Failed(SessionError),
}

fn flow(result: Result<()>) -> ControlFlow<Exit> {
    match result {
        Ok(()) => ControlFlow::Continue(()),
        Err(e) => ControlFlow::Break(Exit::Failed(e)),
    }
}

fn encode_error(message: &'static str, e: &serde_json::Error) -> SessionError {
    SessionError::Encode {
        message,
        reason: e.to_string(),
    }
}

/// The single path for everything sent on the connection
struct Outbound {
    tx: mpsc::UnboundedSender<WireMessage>,
}

impl Outbound {
    fn send(&self, msg: &ClientMessage) -> Result<()> {
        let wire = msg.to_wire().map_err(|e| encode_error(msg.name(), &e))?;
        debug!("📤 {}", msg.name());
        self.tx
            .send(wire)
            .map_err(|_| SessionError::Transport(TransportError::ConnectionClosed))
    }

    fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        trace!("📤 {} bytes of audio", frame.len());
        self.tx
            .send(WireMessage::Binary(frame.data))
            .map_err(|_| SessionError::Transport(TransportError::ConnectionClosed))
    }

    fn close(&self) {
        let _ = self.tx.send(WireMessage::Close);
    }
}

/// Capture and playback for one connection
struct Pipelines {
    capture: CapturePipeline,
    capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    playback: PlaybackPipeline,
    failures: mpsc::UnboundedReceiver<AudioError>,
}

impl Pipelines {
    async fn start(
        input: Box<dyn InputDevice>,
        output: Box<dyn OutputDevice>,
        config: &SessionConfig,
        options: &AgentOptions,
        shared: &Shared,
    ) -> std::result::Result<Self, AudioError> {
        let (failures_tx, failures) = mpsc::unbounded_channel();
        let mut playback = PlaybackPipeline::spawn(output, config.playback_config(options), failures_tx);
        playback.set_volume(shared.volume());
        *lock(&shared.playback) = Some(playback.subscribe());

        shared.gate.set_active(false);
        shared.gate.set_muted(false);
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let capture = match CapturePipeline::spawn(input, config.capture_config(), shared.gate.clone(), capture_tx) {
            Ok(capture) => capture,
            Err(e) => {
                playback.close().await;
                *lock(&shared.playback) = None;
                return Err(e);
            }
        };

        Ok(Self {
            capture,
            capture_rx,
            playback,
            failures,
        })
    }

    async fn shutdown(self, shared: &Shared) {
        shared.gate.set_active(false);
        let mut capture = self.capture;
        // Joining the capture thread blocks until its current read returns
        if let Err(e) = tokio::task::spawn_blocking(move || capture.stop()).await {
            error!("Capture shutdown failed: {}", e);
        }
        let mut playback = self.playback;
        playback.close().await;
        *lock(&shared.playback) = None;
    }
}

struct Link {
    audio: Pipelines,
    outbound: Outbound,
    incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

type Devices = (Box<dyn InputDevice>, Box<dyn OutputDevice>);

async fn open_devices(backend: Arc<dyn AudioBackend>) -> std::result::Result<Devices, AudioError> {
    tokio::task::spawn_blocking(move || -> std::result::Result<Devices, AudioError> {
        let mut output = backend.open_output()?;
        match backend.open_input() {
            Ok(input) => Ok((input, output)),
            Err(e) => {
                output.close();
                Err(e)
            }
        }
    })
    .await
    .map_err(|e| AudioError::Other(format!("Device open task failed: {}", e)))?
}

/// Resolves on a disconnect request or when the handle is gone.
async fn wait_for_disconnect(control: &mut mpsc::UnboundedReceiver<Control>) {
    loop {
        match control.recv().await {
            Some(Control::Disconnect) | None => return,
            Some(_) => debug!("Ignoring command while connecting"),
        }
    }
}

struct SessionTask {
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    config: SessionConfig,
    options: AgentOptions,
    shared: Arc<Shared>,
}

impl SessionTask {
    async fn run(self, mut control: mpsc::UnboundedReceiver<Control>) {
        let exit = match self.establish(&mut control).await {
            Ok(Some(mut link)) => {
                self.shared.set_connection(ConnectionState::Connected);
                self.shared.gate.set_active(true);
                self.shared.set_agent(AgentState::Listening);

                let exit = self.drive(&mut link, &mut control).await;

                link.outbound.close();
                link.audio.shutdown(&self.shared).await;
                exit
            }
            Ok(None) => Exit::Requested,
            Err(e) => Exit::Failed(e),
        };
        self.finish(exit);
    }

    /// Open devices and the connection and send the handshake. `Ok(None)`
    /// means a disconnect arrived first.
    async fn establish(&self, control: &mut mpsc::UnboundedReceiver<Control>) -> Result<Option<Link>> {
        let (input, output) = open_devices(self.backend.clone()).await?;
        let audio = Pipelines::start(input, output, &self.config, &self.options, &self.shared).await?;

        match self.handshake(control).await {
            Ok(Some((outbound, incoming))) => Ok(Some(Link {
                audio,
                outbound,
                incoming,
            })),
            other => {
                audio.shutdown(&self.shared).await;
                other.map(|_| None)
            }
        }
    }

    async fn handshake(
        &self,
        control: &mut mpsc::UnboundedReceiver<Control>,
    ) -> Result<Option<(Outbound, mpsc::UnboundedReceiver<TransportEvent>)>> {
        let connection = tokio::select! {
            opened = self.open_transport() => opened?,
            _ = wait_for_disconnect(control) => {
                info!("Disconnect requested during handshake");
                return Ok(None);
            }
        };
        let outbound = Outbound { tx: connection.outgoing };
        outbound.send(&ClientMessage::settings(&self.options, &self.config))?;
        Ok(Some((outbound, connection.incoming)))
    }

    async fn open_transport(&self) -> std::result::Result<Connection, TransportError> {
        let token = self.tokens.token().await?;
        self.connector
            .open(ConnectRequest {
                url: self.config.url.clone(),
                token,
            })
            .await
    }

    async fn drive(&self, link: &mut Link, control: &mut mpsc::UnboundedReceiver<Control>) -> Exit {
        let router = Router::new(self.config.output_rate);
        let period = self.config.keepalive;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                event = link.incoming.recv() => match event {
                    Some(event) => self.dispatch(router.route(event), link).await,
                    None => ControlFlow::Break(Exit::Closed {
                        code: None,
                        reason: "connection dropped".to_string(),
                    }),
                },
                Some(captured) = link.audio.capture_rx.recv() => match captured {
                    CaptureEvent::Frame(frame) => self.forward_audio(frame, &link.outbound),
                    CaptureEvent::Failed(e) => ControlFlow::Break(Exit::Failed(e.into())),
                },
                Some(e) = link.audio.failures.recv() => ControlFlow::Break(Exit::Failed(e.into())),
                _ = keepalive.tick() => flow(link.outbound.send(&ClientMessage::KeepAlive)),
                cmd = control.recv() => self.handle_control(cmd, link).await,
            };
            if let ControlFlow::Break(exit) = step {
                return exit;
            }
        }
    }

    fn forward_audio(&self, frame: AudioFrame, outbound: &Outbound) -> ControlFlow<Exit> {
        // The gate may have closed while the frame sat in the channel
        if !self.shared.gate.is_forwarding() {
            trace!("Dropping captured frame, capture is muted");
            return ControlFlow::Continue(());
        }
        flow(outbound.send_audio(frame))
    }

    async fn dispatch(&self, dispatch: Dispatch, link: &mut Link) -> ControlFlow<Exit> {
        let callbacks = &self.shared.callbacks;
        match dispatch {
            Dispatch::PlayAudio(frame) => link.audio.playback.push(frame),
            Dispatch::Agent {
                state,
                interrupt_playback,
                edge,
            } => {
                if interrupt_playback {
                    link.audio.playback.interrupt().await;
                }
                self.shared.set_agent(state);
                match edge {
                    Some(PlaybackEdge::Started) => callbacks.playback_start(),
                    Some(PlaybackEdge::Ended) => callbacks.playback_end(),
                    None => {}
                }
            }
            Dispatch::ConversationText { role, text } => {
                info!("💬 {:?}: {}", role, text);
                lock(&self.shared.transcript).push(TranscriptEntry {
                    role,
                    text: text.clone(),
                });
                match role {
                    Role::User => callbacks.user_transcript(&text, true),
                    Role::Assistant => callbacks.agent_utterance(&text),
                }
            }
            Dispatch::InterimTranscript { text, is_final } => callbacks.user_transcript(&text, is_final),
            Dispatch::RemoteError { code, message, warning } => {
                self.shared.report(SessionError::Remote { code, message, warning })
            }
            Dispatch::Closed { code, reason } => return ControlFlow::Break(Exit::Closed { code, reason }),
            Dispatch::TransportFailed(message) => {
                return ControlFlow::Break(Exit::Failed(TransportError::WebSocket(message).into()))
            }
            Dispatch::Ignore => {}
        }
        ControlFlow::Continue(())
    }

    async fn handle_control(&self, cmd: Option<Control>, link: &mut Link) -> ControlFlow<Exit> {
        let result = match cmd {
            None | Some(Control::Disconnect) => return ControlFlow::Break(Exit::Requested),
            Some(Control::Interrupt) => {
                let sent = link.outbound.send(&ClientMessage::Interrupt);
                link.audio.playback.interrupt().await;
                sent
            }
            Some(Control::InjectUser(content)) => link.outbound.send(&ClientMessage::InjectUserMessage { content }),
            Some(Control::UpdatePrompt(prompt)) => link.outbound.send(&ClientMessage::UpdatePrompt { prompt }),
            Some(Control::UpdateVoice(voice)) => link.outbound.send(&ClientMessage::UpdateSpeak {
                speak: SpeakConfig::voice(&voice),
            }),
            Some(Control::InjectAgent(message)) => {
                link.outbound.send(&ClientMessage::InjectAgentMessage { message })
            }
            Some(Control::SetVolume(volume)) => {
                link.audio.playback.set_volume(volume);
                Ok(())
            }
        };
        flow(result)
    }

    fn finish(&self, exit: Exit) {
        self.shared.set_agent(AgentState::Idle);
        match exit {
            Exit::Requested => {
                info!("Session ended");
                self.shared.set_connection(ConnectionState::Disconnected);
            }
            Exit::Closed {
                code: Some(TransportEvent::NORMAL_CLOSURE),
                reason,
            } => {
                info!("Agent closed the connection: {}", reason);
                self.shared.set_connection(ConnectionState::Disconnected);
            }
            Exit::Closed { code, reason } => {
                self.shared.set_connection(ConnectionState::Error);
                self.shared.report(SessionError::Closed { code, reason });
            }
            Exit::Failed(e) => {
                self.shared.set_connection(ConnectionState::Error);
                self.shared.report(e);
            }
        }
    }
}
