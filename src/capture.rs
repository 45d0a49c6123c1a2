//! Capture pipeline
//!
//! Pulls fixed-size blocks from the input device on a dedicated OS thread,
//! resamples them to the protocol input rate, encodes PCM16 and hands the
//! frames to the session task. While the gate is closed blocks are still read,
//! so the device buffer never overflows, but they are thrown away.

use crate::codec;
use crate::device::{AudioError, InputDevice};
use crate::events::{AudioFrame, CaptureEvent};
use crate::resample::resample;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace};

/// Samples pulled from the device per read.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Rate the remote side expects for input audio
    pub target_rate: u32,
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_rate: 16_000,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Decides whether captured blocks leave the process.
///
/// The session writes it; the capture thread only reads it. Frames are
/// forwarded only while the gate is active (transport open) and not muted
/// (agent is not thinking or speaking).
#[derive(Debug, Clone, Default)]
pub struct CaptureGate {
    active: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_forwarding(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.muted.load(Ordering::SeqCst)
    }
}

/// Resample one device block to `target_rate` and encode it for the wire.
pub fn encode_block(samples: &[f32], native_rate: u32, target_rate: u32) -> AudioFrame {
    let resampled = resample(samples, native_rate, target_rate);
    AudioFrame::new(codec::encode(&resampled), target_rate)
}

/// Handle to the running capture thread. Dropping it stops the thread.
pub struct CapturePipeline {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Start reading from an already opened `device`.
    pub fn spawn(
        device: Box<dyn InputDevice>,
        config: CaptureConfig,
        gate: CaptureGate,
        tx: UnboundedSender<CaptureEvent>,
    ) -> Result<Self, AudioError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        info!(
            "Starting capture: {} Hz device -> {} Hz, {} sample blocks",
            device.sample_rate(),
            config.target_rate,
            config.block_size
        );

        // Device reads block; keep them off the runtime
        let handle = std::thread::Builder::new()
            .name("rhovoice-capture".into())
            .spawn(move || capture_loop(device, config, gate, tx, shutdown_clone))
            .map_err(|e| AudioError::Other(format!("Failed to spawn capture thread: {}", e)))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to release the device.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
            debug!("Capture thread joined");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut device: Box<dyn InputDevice>,
    config: CaptureConfig,
    gate: CaptureGate,
    tx: UnboundedSender<CaptureEvent>,
    shutdown: Arc<AtomicBool>,
) {
    let native_rate = device.sample_rate();
    let mut block = vec![0.0f32; config.block_size.max(1)];

    while !shutdown.load(Ordering::SeqCst) {
        let n = match device.read_block(&mut block) {
            Ok(0) => continue,
            Ok(n) => n.min(block.len()),
            Err(e) => {
                error!("Input device failed: {}", e);
                let _ = tx.send(CaptureEvent::Failed(e));
                break;
            }
        };

        if !gate.is_forwarding() {
            trace!("Discarding {} captured samples (gate closed)", n);
            continue;
        }

        let frame = encode_block(&block[..n], native_rate, config.target_rate);
        if tx.send(CaptureEvent::Frame(frame)).is_err() {
            debug!("Capture receiver dropped, stopping");
            break;
        }
    }

    device.close();
    info!("Capture stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeInput;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[test]
    fn test_encode_block_resamples_and_encodes() {
        let frame = encode_block(&vec![0.5f32; 4096], 48_000, 16_000);
        assert_eq!(frame.sample_rate, 16_000);
        assert_eq!(frame.len(), 1365 * 2);
        assert_eq!(&frame.data[..2], &16384i16.to_le_bytes());
    }

    #[tokio::test]
    async fn test_forwards_only_through_open_gate() {
        let (input, feed) = FakeInput::new(48_000);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = CaptureGate::new();
        let mut capture =
            CapturePipeline::spawn(Box::new(input), CaptureConfig::default(), gate.clone(), tx).unwrap();

        // Inactive gate: block is read and dropped
        feed.send(vec![0.1; 4096]).unwrap();
        assert!(timeout(Duration::from_millis(150), rx.recv()).await.is_err());

        gate.set_active(true);
        feed.send(vec![0.1; 4096]).unwrap();
        match timeout(Duration::from_secs(2), rx.recv()).await.unwrap() {
            Some(CaptureEvent::Frame(frame)) => assert_eq!(frame.len(), 2730),
            other => panic!("Unexpected event: {:?}", other),
        }

        gate.set_muted(true);
        feed.send(vec![0.1; 4096]).unwrap();
        assert!(timeout(Duration::from_millis(150), rx.recv()).await.is_err());

        capture.stop();
        assert!(!capture.is_running());
    }

    #[tokio::test]
    async fn test_device_failure_is_reported() {
        let (input, feed) = FakeInput::new(16_000);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _capture =
            CapturePipeline::spawn(Box::new(input), CaptureConfig::default(), CaptureGate::new(), tx).unwrap();

        // Dropping the feed revokes the fake device
        drop(feed);
        match timeout(Duration::from_secs(2), rx.recv()).await.unwrap() {
            Some(CaptureEvent::Failed(AudioError::Revoked(_))) => {}
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
