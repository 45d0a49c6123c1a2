//! Audio device collaborators
//!
//! The capture and playback pipelines never touch hardware directly; they
//! talk to these traits. `crate::pulse` implements them on PulseAudio and the
//! test suite implements them with in-memory fakes.

use tokio::sync::oneshot;

/// Custom error for audio device operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AudioError {
    /// No audio devices were found
    #[error("No audio devices found")]
    NoDevicesFound,

    /// The device could not be opened
    #[error("Failed to open device: {0}")]
    Open(String),

    /// Reading from an input device failed
    #[error("Read error: {0}")]
    Read(String),

    /// Writing to an output device failed
    #[error("Write error: {0}")]
    Write(String),

    /// The device went away while in use
    #[error("Device revoked: {0}")]
    Revoked(String),

    #[error("Audio error: {0}")]
    Other(String),
}

/// Resolves when a scheduled buffer has finished playing. A dropped sender
/// (the buffer was stopped) counts as finished too.
pub type Completion = oneshot::Receiver<()>;

/// Microphone-side device producing mono float samples at its native rate.
pub trait InputDevice: Send {
    fn sample_rate(&self) -> u32;

    /// Fill `buf` with up to `buf.len()` samples and return how many were
    /// written. May return `Ok(0)` when nothing arrived within the device's
    /// polling interval; must not block indefinitely.
    fn read_block(&mut self, buf: &mut [f32]) -> Result<usize, AudioError>;

    fn close(&mut self) {}
}

/// Speaker-side device accepting buffers scheduled on its own clock.
pub trait OutputDevice: Send {
    fn sample_rate(&self) -> u32;

    /// Current output-clock time in seconds.
    fn current_time(&self) -> f64;

    /// Schedule mono `samples` to begin exactly at `start_at` (output clock).
    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<Completion, AudioError>;

    /// Stop everything scheduled or playing.
    fn stop(&mut self);

    fn close(&mut self) {}
}

/// Opens fresh device handles for each connection.
pub trait AudioBackend: Send + Sync {
    fn open_input(&self) -> Result<Box<dyn InputDevice>, AudioError>;
    fn open_output(&self) -> Result<Box<dyn OutputDevice>, AudioError>;
}
