//! RhoVoice - real-time voice dialogue with a hosted voice agent
//!
//! Microphone audio is resampled to PCM16 and streamed over a WebSocket; the
//! agent's synthesized speech comes back as binary frames and is scheduled
//! gaplessly on the speaker. A [`Session`] ties both pipelines to the
//! protocol router and the connection/agent state machine.

#![forbid(unsafe_code)]

pub mod callbacks;
pub mod capture;
pub mod codec;
pub mod config;
pub mod device;
pub mod events;
pub mod filter;
pub mod playback;
pub mod protocol;
#[cfg(feature = "pulse")]
pub mod pulse;
pub mod resample;
pub mod router;
pub mod session;
pub mod state;
pub mod transport;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use callbacks::Callbacks;
pub use config::{AgentOptions, ConfigError, SessionConfig};
pub use device::{AudioBackend, AudioError, InputDevice, OutputDevice};
pub use events::{AudioFrame, PlaybackStatus};
pub use session::{Session, SessionError, TranscriptEntry};
pub use state::{AgentState, ConnectionState};
pub use transport::{Connector, StaticToken, TokenProvider, TransportError};
pub use ws::WsConnector;
