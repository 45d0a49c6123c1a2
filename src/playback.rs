//! Playback pipeline
//!
//! `PlaybackScheduler` holds the queue and scheduling cursor and does the
//! decode → resample → filter → schedule work for one frame at a time. It is
//! plain synchronous code so the ordering rules can be tested directly.
//! `PlaybackPipeline` wraps it in a tokio task that owns the output device,
//! takes commands over a channel and advances the queue whenever the device
//! reports a buffer finished.

use crate::codec;
use crate::device::{AudioError, Completion, OutputDevice};
use crate::events::{AudioFrame, PlaybackStatus};
use crate::filter::{FilterChain, FilterConfig};
use crate::resample::resample;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    /// Rate of inbound audio when the frame carries no container header
    pub source_rate: u32,
    /// Playback speed multiplier applied to the source rate
    pub speed: f32,
    pub filter: FilterConfig,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            source_rate: 24_000,
            speed: 1.0,
            filter: FilterConfig::default(),
        }
    }
}

pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    queue: VecDeque<AudioFrame>,
    /// Output-clock time at which the next buffer must start. `None` once the
    /// queue has drained, so the next frame starts immediately.
    cursor: Option<f64>,
    draining: bool,
    filters: FilterChain,
    speed: f32,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn OutputDevice>, config: PlaybackConfig) -> Self {
        let filters = FilterChain::new(config.filter, device.sample_rate());
        Self {
            device,
            queue: VecDeque::new(),
            cursor: None,
            draining: false,
            filters,
            speed: config.speed,
        }
    }

    /// Append a frame. Returns true when this frame starts a new drain, i.e.
    /// the caller should call `play_next`.
    pub fn enqueue(&mut self, frame: AudioFrame) -> bool {
        trace!("Queueing {} bytes of playback audio", frame.len());
        self.queue.push_back(frame);
        if self.draining {
            false
        } else {
            self.draining = true;
            true
        }
    }

    /// Schedule the next playable frame and return its completion.
    ///
    /// Frames that fail to decode or decode to nothing are skipped. Returns
    /// `Ok(None)` once the queue is empty, which also ends the drain and
    /// clears the cursor.
    pub fn play_next(&mut self) -> Result<Option<Completion>, AudioError> {
        while let Some(frame) = self.queue.pop_front() {
            let decoded = match codec::decode(&frame.data) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Skipping undecodable audio frame ({} bytes): {}", frame.len(), e);
                    continue;
                }
            };

            let source_rate = decoded.sample_rate.unwrap_or(frame.sample_rate);
            let device_rate = self.device.sample_rate();
            let mut buffer = resample(&decoded.samples, effective_rate(source_rate, self.speed), device_rate);
            if buffer.is_empty() {
                debug!("Dropping empty audio frame");
                continue;
            }
            self.filters.process(&mut buffer);

            let now = self.device.current_time();
            let start = self.cursor.map_or(now, |cursor| cursor.max(now));
            let duration = buffer.len() as f64 / device_rate as f64;

            let completion = self.device.schedule(buffer, start)?;
            self.cursor = Some(start + duration);
            trace!("Scheduled {:.3}s of audio at {:.3}", duration, start);
            return Ok(Some(completion));
        }

        self.draining = false;
        self.cursor = None;
        Ok(None)
    }

    /// Drop everything queued, stop what is playing and reset the cursor.
    /// Returns the number of frames discarded.
    pub fn interrupt(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.device.stop();
        self.cursor = None;
        self.draining = false;
        self.filters.reset();
        dropped
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.filters.set_gain(gain);
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            queued: self.queue.len(),
            draining: self.draining,
            cursor: self.cursor,
        }
    }

    /// Interrupt and release the device.
    pub fn close(&mut self) {
        self.interrupt();
        self.device.close();
    }
}

fn effective_rate(source_rate: u32, speed: f32) -> u32 {
    let rate = (source_rate as f64 * speed as f64).round();
    if rate.is_finite() && rate >= 1.0 {
        rate as u32
    } else {
        source_rate
    }
}

enum PlaybackCommand {
    Frame(AudioFrame),
    Interrupt(oneshot::Sender<usize>),
    SetVolume(f32),
    Close,
}

/// Handle to the playback task
pub struct PlaybackPipeline {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
    status: watch::Receiver<PlaybackStatus>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackPipeline {
    /// Start the playback task on the current runtime. A fatal device error
    /// is sent on `failures` and ends the task.
    pub fn spawn(
        device: Box<dyn OutputDevice>,
        config: PlaybackConfig,
        failures: mpsc::UnboundedSender<AudioError>,
    ) -> Self {
        info!(
            "Starting playback: {} Hz source x{} -> {} Hz device",
            config.source_rate,
            config.speed,
            device.sample_rate()
        );
        let scheduler = PlaybackScheduler::new(device, config);
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(PlaybackStatus::default());
        let handle = tokio::spawn(playback_task(scheduler, rx, status_tx, failures));

        Self {
            tx,
            status,
            handle: Some(handle),
        }
    }

    pub fn push(&self, frame: AudioFrame) {
        if self.tx.send(PlaybackCommand::Frame(frame)).is_err() {
            debug!("Playback task gone, dropping frame");
        }
    }

    /// Clear the queue and stop the current buffer. Resolves once the task
    /// has done so, so frames pushed afterwards are never cleared by it.
    pub async fn interrupt(&self) -> usize {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PlaybackCommand::Interrupt(ack_tx)).is_err() {
            return 0;
        }
        ack_rx.await.unwrap_or(0)
    }

    pub fn set_volume(&self, volume: f32) {
        let _ = self.tx.send(PlaybackCommand::SetVolume(volume));
    }

    pub fn status(&self) -> PlaybackStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }

    /// Stop playback, release the device and wait for the task to finish.
    pub async fn close(&mut self) {
        let _ = self.tx.send(PlaybackCommand::Close);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Playback task failed: {}", e);
            }
        }
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(PlaybackCommand::Close);
    }
}

async fn finished(in_flight: &mut Option<Completion>) {
    match in_flight {
        // A dropped sender means the buffer was stopped; treat it as done
        Some(completion) => {
            let _ = completion.await;
        }
        None => std::future::pending().await,
    }
}

/// Schedule the next buffer, reporting a device failure. `Err` ends the task.
fn advance(
    scheduler: &mut PlaybackScheduler,
    failures: &mpsc::UnboundedSender<AudioError>,
) -> Result<Option<Completion>, ()> {
    match scheduler.play_next() {
        Ok(completion) => {
            if completion.is_none() {
                debug!("Playback queue drained");
            }
            Ok(completion)
        }
        Err(e) => {
            error!("Output device failed: {}", e);
            let _ = failures.send(e);
            Err(())
        }
    }
}

async fn playback_task(
    mut scheduler: PlaybackScheduler,
    mut rx: mpsc::UnboundedReceiver<PlaybackCommand>,
    status_tx: watch::Sender<PlaybackStatus>,
    failures: mpsc::UnboundedSender<AudioError>,
) {
    let mut in_flight: Option<Completion> = None;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(PlaybackCommand::Frame(frame)) => {
                    if scheduler.enqueue(frame) && in_flight.is_none() {
                        match advance(&mut scheduler, &failures) {
                            Ok(next) => in_flight = next,
                            Err(()) => break,
                        }
                    }
                }
                Some(PlaybackCommand::Interrupt(ack)) => {
                    in_flight = None;
                    let dropped = scheduler.interrupt();
                    debug!("Playback interrupted, {} frames dropped", dropped);
                    let _ = status_tx.send(scheduler.status());
                    let _ = ack.send(dropped);
                }
                Some(PlaybackCommand::SetVolume(volume)) => scheduler.set_gain(volume),
                Some(PlaybackCommand::Close) | None => break,
            },
            _ = finished(&mut in_flight), if in_flight.is_some() => {
                match advance(&mut scheduler, &failures) {
                    Ok(next) => in_flight = next,
                    Err(()) => break,
                }
            }
        }
        let _ = status_tx.send(scheduler.status());
    }

    // Closing a real device joins its writer thread
    match tokio::task::spawn_blocking(move || {
        scheduler.close();
        scheduler.status()
    })
    .await
    {
        Ok(status) => {
            let _ = status_tx.send(status);
        }
        Err(e) => error!("Playback device close failed: {}", e),
    }
    info!("Playback stopped");
}
