//! Messages passed between the pipelines, the session task and the transport

use crate::device::AudioError;

/// One chunk of mono PCM16 audio, exclusively owned by whichever stage is
/// currently handling it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Payload written to the duplex connection
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Lifecycle and payload events read from the duplex connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Text(String),
    Binary(Vec<u8>),
    /// The remote side (or the network) closed the connection.
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

impl TransportEvent {
    /// Normal closure code from RFC 6455.
    pub const NORMAL_CLOSURE: u16 = 1000;
}

/// Emitted by the capture thread
#[derive(Debug)]
pub enum CaptureEvent {
    Frame(AudioFrame),
    /// The input device failed; capture has stopped for good.
    Failed(AudioError),
}

/// Snapshot of the playback pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackStatus {
    /// Frames waiting behind the buffer currently playing.
    pub queued: usize,
    pub draining: bool,
    /// Output-clock time (seconds) at which the next buffer starts, if set.
    pub cursor: Option<f64>,
}
