//! PulseAudio devices
//!
//! Each device runs its own worker thread that owns the `Simple` stream; the
//! device handle talks to it over channels. Samples are exchanged as native
//! 32-bit floats, mono, at the rate the backend was configured with.

use crate::device::{AudioBackend, AudioError, Completion, InputDevice, OutputDevice};
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use libpulse_binding::def::Retval;
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::proplist::{properties, Proplist};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Samples per read from the record stream
const READ_CHUNK: usize = 1024;

fn float_spec(rate: u32) -> Result<Spec, AudioError> {
    let spec = Spec {
        format: Format::F32le,
        channels: 1,
        rate,
    };
    if spec.is_valid() {
        Ok(spec)
    } else {
        Err(AudioError::Open(format!("Invalid sample spec for {} Hz", rate)))
    }
}

/// Opens PulseAudio record/playback streams
#[derive(Debug, Clone)]
pub struct PulseBackend {
    pub app_name: String,
    /// `None` uses the server default
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_rate: u32,
    pub output_rate: u32,
}

impl Default for PulseBackend {
    fn default() -> Self {
        Self {
            app_name: "rhovoice".to_string(),
            input_device: None,
            output_device: None,
            input_rate: 48_000,
            output_rate: 48_000,
        }
    }
}

impl AudioBackend for PulseBackend {
    fn open_input(&self) -> Result<Box<dyn InputDevice>, AudioError> {
        let input = PulseInput::open(&self.app_name, self.input_device.as_deref(), self.input_rate)?;
        Ok(Box::new(input))
    }

    fn open_output(&self) -> Result<Box<dyn OutputDevice>, AudioError> {
        let output = PulseOutput::open(&self.app_name, self.output_device.as_deref(), self.output_rate)?;
        Ok(Box::new(output))
    }
}

/// Spawn a worker thread and wait for it to report whether its stream opened.
fn spawn_worker<F>(name: &str, body: F) -> Result<JoinHandle<()>, AudioError>
where
    F: FnOnce(mpsc::Sender<Result<(), AudioError>>) + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel();
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(ready_tx))
        .map_err(|e| AudioError::Other(format!("Failed to spawn {}: {}", name, e)))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => Err(AudioError::Open(format!("{} exited during startup", name))),
    }
}

/// Microphone record stream
pub struct PulseInput {
    rate: u32,
    rx: mpsc::Receiver<Result<Vec<f32>, AudioError>>,
    pending: VecDeque<f32>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PulseInput {
    pub fn open(app_name: &str, device: Option<&str>, rate: u32) -> Result<Self, AudioError> {
        let spec = float_spec(rate)?;
        let app_name = app_name.to_string();
        let device = device.map(str::to_string);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let (tx, rx) = mpsc::channel();

        let handle = spawn_worker("rhovoice-pulse-record", move |ready| {
            let simple = match Simple::new(
                None,
                &app_name,
                Direction::Record,
                device.as_deref(),
                "record",
                &spec,
                None,
                None,
            ) {
                Ok(simple) => {
                    let _ = ready.send(Ok(()));
                    simple
                }
                Err(e) => {
                    let _ = ready.send(Err(AudioError::Open(format!("record stream: {}", e))));
                    return;
                }
            };
            info!("🎤 Recording from {} at {} Hz", device.as_deref().unwrap_or("default source"), rate);

            let mut bytes = vec![0u8; READ_CHUNK * 4];
            while !shutdown_clone.load(Ordering::Relaxed) {
                if let Err(e) = simple.read(&mut bytes) {
                    let _ = tx.send(Err(AudioError::Read(format!("{}", e))));
                    return;
                }
                let samples = bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                if tx.send(Ok(samples)).is_err() {
                    return;
                }
            }
            debug!("Record worker stopped");
        })?;

        Ok(Self {
            rate,
            rx,
            pending: VecDeque::new(),
            shutdown,
            handle: Some(handle),
        })
    }
}

impl InputDevice for PulseInput {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn read_block(&mut self, buf: &mut [f32]) -> Result<usize, AudioError> {
        while self.pending.len() < buf.len() {
            match self.rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(chunk)) => self.pending.extend(chunk),
                Ok(Err(e)) => return Err(e),
                // Partial block stays pending for the next call
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::Revoked("record stream ended".to_string()))
                }
            }
        }
        let n = buf.len();
        for (slot, sample) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(buf.len())
    }

    fn close(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Record worker panicked");
            }
        }
    }
}

impl Drop for PulseInput {
    fn drop(&mut self) {
        self.close();
    }
}

enum OutputCommand {
    Play {
        samples: Vec<f32>,
        start_at: f64,
        generation: u64,
        done: oneshot::Sender<()>,
    },
    Stop,
}

/// Speaker playback stream
///
/// The output clock is wall time since the stream opened. The worker tracks
/// where the audio it has written ends on that clock and pads with silence
/// when a buffer is scheduled later than that.
pub struct PulseOutput {
    rate: u32,
    epoch: Instant,
    tx: Option<mpsc::Sender<OutputCommand>>,
    /// Bumped by `stop`; buffers scheduled before it are discarded
    generation: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl PulseOutput {
    pub fn open(app_name: &str, device: Option<&str>, rate: u32) -> Result<Self, AudioError> {
        let spec = float_spec(rate)?;
        let app_name = app_name.to_string();
        let device = device.map(str::to_string);
        let epoch = Instant::now();
        let generation = Arc::new(AtomicU64::new(0));
        let worker_generation = generation.clone();
        let (tx, rx) = mpsc::channel::<OutputCommand>();

        let handle = spawn_worker("rhovoice-pulse-playback", move |ready| {
            let simple = match Simple::new(
                None,
                &app_name,
                Direction::Playback,
                device.as_deref(),
                "playback",
                &spec,
                None,
                None,
            ) {
                Ok(simple) => {
                    let _ = ready.send(Ok(()));
                    simple
                }
                Err(e) => {
                    let _ = ready.send(Err(AudioError::Open(format!("playback stream: {}", e))));
                    return;
                }
            };
            info!("🔊 Playing to {} at {} Hz", device.as_deref().unwrap_or("default sink"), rate);

            let mut written_until = 0.0f64;
            while let Ok(cmd) = rx.recv() {
                match cmd {
                    OutputCommand::Play {
                        samples,
                        start_at,
                        generation,
                        done,
                    } => {
                        if generation != worker_generation.load(Ordering::SeqCst) {
                            continue;
                        }
                        let head = written_until.max(epoch.elapsed().as_secs_f64());
                        let gap = ((start_at - head) * rate as f64).round();
                        let mut bytes = Vec::with_capacity((samples.len() + gap.max(0.0) as usize) * 4);
                        if gap >= 1.0 {
                            bytes.resize(gap as usize * 4, 0);
                        }
                        for sample in &samples {
                            bytes.extend_from_slice(&sample.to_le_bytes());
                        }
                        if let Err(e) = simple.write(&bytes) {
                            error!("Playback write failed: {}", e);
                            return;
                        }
                        written_until = head + (bytes.len() / 4) as f64 / rate as f64;
                        let _ = done.send(());
                    }
                    OutputCommand::Stop => {
                        if let Err(e) = simple.flush() {
                            warn!("Playback flush failed: {}", e);
                        }
                        written_until = 0.0;
                    }
                }
            }
            let _ = simple.flush();
            debug!("Playback worker stopped");
        })?;

        Ok(Self {
            rate,
            epoch,
            tx: Some(tx),
            generation,
            handle: Some(handle),
        })
    }
}

impl OutputDevice for PulseOutput {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<Completion, AudioError> {
        let (done, completion) = oneshot::channel();
        let cmd = OutputCommand::Play {
            samples,
            start_at,
            generation: self.generation.load(Ordering::SeqCst),
            done,
        };
        match &self.tx {
            Some(tx) => tx
                .send(cmd)
                .map_err(|_| AudioError::Write("playback stream ended".to_string()))?,
            None => return Err(AudioError::Write("playback stream closed".to_string())),
        }
        Ok(completion)
    }

    fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = &self.tx {
            let _ = tx.send(OutputCommand::Stop);
        }
    }

    fn close(&mut self) {
        self.stop();
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Playback worker panicked");
            }
        }
    }
}

impl Drop for PulseOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Microphone,
    /// Monitor of a sink (system playback)
    Monitor,
    Speaker,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// PulseAudio source/sink name, usable as `input_device`/`output_device`
    pub name: String,
    pub description: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub kind: DeviceKind,
}

/// List every source and sink known to the PulseAudio server.
pub fn list_devices() -> Result<Vec<DeviceInfo>, AudioError> {
    let mut proplist = Proplist::new().ok_or_else(|| AudioError::Other("Failed to create proplist".to_string()))?;
    proplist
        .set_str(properties::APPLICATION_NAME, "rhovoice-device-lister")
        .map_err(|_| AudioError::Other("Failed to set application name".to_string()))?;

    let mut mainloop =
        Mainloop::new().ok_or_else(|| AudioError::Other("Failed to create mainloop".to_string()))?;
    let mut context = Context::new_with_proplist(&mainloop, "rhovoice-context", &proplist)
        .ok_or_else(|| AudioError::Other("Failed to create context".to_string()))?;
    context
        .connect(None, ContextFlagSet::NOFLAGS, None)
        .map_err(|e| AudioError::Open(format!("PulseAudio connect: {}", e)))?;

    loop {
        iterate(&mut mainloop)?;
        match context.get_state() {
            ContextState::Ready => break,
            ContextState::Failed | ContextState::Terminated => {
                return Err(AudioError::Open("PulseAudio connection failed".to_string()))
            }
            _ => {}
        }
    }

    let devices = Arc::new(Mutex::new(Vec::new()));
    // Sources and sinks each report End once
    let finished = Arc::new(Mutex::new(0u8));
    let introspector = context.introspect();

    let (list, done) = (devices.clone(), finished.clone());
    let _sources = introspector.get_source_info_list(move |result| match result {
        ListResult::Item(info) => {
            let is_monitor = info.monitor_of_sink.is_some();
            if let (Some(name), Some(description)) = (&info.name, &info.description) {
                if let Ok(mut list) = list.lock() {
                    list.push(DeviceInfo {
                        name: name.to_string(),
                        description: description.to_string(),
                        sample_rate: info.sample_spec.rate,
                        channels: info.sample_spec.channels,
                        kind: if is_monitor {
                            DeviceKind::Monitor
                        } else {
                            DeviceKind::Microphone
                        },
                    });
                }
            }
        }
        ListResult::End | ListResult::Error => {
            if let Ok(mut done) = done.lock() {
                *done += 1;
            }
        }
    });

    let (list, done) = (devices.clone(), finished.clone());
    let _sinks = introspector.get_sink_info_list(move |result| match result {
        ListResult::Item(info) => {
            if let (Some(name), Some(description)) = (&info.name, &info.description) {
                if let Ok(mut list) = list.lock() {
                    list.push(DeviceInfo {
                        name: name.to_string(),
                        description: description.to_string(),
                        sample_rate: info.sample_spec.rate,
                        channels: info.sample_spec.channels,
                        kind: DeviceKind::Speaker,
                    });
                }
            }
        }
        ListResult::End | ListResult::Error => {
            if let Ok(mut done) = done.lock() {
                *done += 1;
            }
        }
    });

    loop {
        iterate(&mut mainloop)?;
        if finished.lock().map(|done| *done >= 2).unwrap_or(true) {
            break;
        }
    }

    context.disconnect();
    mainloop.quit(Retval(0));

    let devices = devices
        .lock()
        .map(|list| list.clone())
        .map_err(|_| AudioError::Other("Failed to access device list".to_string()))?;
    if devices.is_empty() {
        return Err(AudioError::NoDevicesFound);
    }
    Ok(devices)
}

fn iterate(mainloop: &mut Mainloop) -> Result<(), AudioError> {
    match mainloop.iterate(true) {
        IterateResult::Success(_) => Ok(()),
        IterateResult::Quit(_) | IterateResult::Err(_) => {
            Err(AudioError::Other("PulseAudio mainloop iterate failed".to_string()))
        }
    }
}
