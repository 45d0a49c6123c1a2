//! In-memory devices and connection used by the test suite

use crate::device::{AudioBackend, AudioError, Completion, InputDevice, OutputDevice};
use crate::events::{TransportEvent, WireMessage};
use crate::transport::{ConnectRequest, Connection, Connector, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Input device fed by the test through a channel. Dropping the feed
/// revokes the device.
pub struct FakeInput {
    rate: u32,
    rx: std_mpsc::Receiver<Vec<f32>>,
}

impl FakeInput {
    pub fn new(rate: u32) -> (Self, std_mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = std_mpsc::channel();
        (Self { rate, rx }, tx)
    }
}

impl InputDevice for FakeInput {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn read_block(&mut self, buf: &mut [f32]) -> Result<usize, AudioError> {
        match self.rx.recv_timeout(Duration::from_millis(10)) {
            Ok(block) => {
                let n = block.len().min(buf.len());
                buf[..n].copy_from_slice(&block[..n]);
                Ok(n)
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(0),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                Err(AudioError::Revoked("fake input feed dropped".to_string()))
            }
        }
    }
}

#[derive(Debug, Default)]
struct OutputLog {
    now: f64,
    /// (start_at, sample count)
    scheduled: Vec<(f64, usize)>,
    pending: Vec<oneshot::Sender<()>>,
    stops: usize,
    closed: bool,
    fail_next: bool,
    close_delay: Duration,
}

/// Output device recording every scheduled buffer. In auto mode buffers
/// complete as soon as they are scheduled; in manual mode the test completes
/// them through the probe.
pub struct FakeOutput {
    rate: u32,
    auto_complete: bool,
    log: Arc<Mutex<OutputLog>>,
}

/// Test-side view of a `FakeOutput`
#[derive(Clone)]
pub struct OutputProbe {
    log: Arc<Mutex<OutputLog>>,
}

impl FakeOutput {
    pub fn new(rate: u32) -> (Self, OutputProbe) {
        Self::build(rate, true)
    }

    pub fn manual(rate: u32) -> (Self, OutputProbe) {
        Self::build(rate, false)
    }

    fn build(rate: u32, auto_complete: bool) -> (Self, OutputProbe) {
        let log = Arc::new(Mutex::new(OutputLog::default()));
        (
            Self {
                rate,
                auto_complete,
                log: log.clone(),
            },
            OutputProbe { log },
        )
    }
}

impl OutputDevice for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn current_time(&self) -> f64 {
        self.log.lock().unwrap().now
    }

    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<Completion, AudioError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_next {
            log.fail_next = false;
            return Err(AudioError::Write("fake output failure".to_string()));
        }
        log.scheduled.push((start_at, samples.len()));
        let (tx, rx) = oneshot::channel();
        if self.auto_complete {
            let _ = tx.send(());
        } else {
            log.pending.push(tx);
        }
        Ok(rx)
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        log.pending.clear();
    }

    fn close(&mut self) {
        let delay = self.log.lock().unwrap().close_delay;
        // Blocks like a device joining its worker thread
        std::thread::sleep(delay);
        self.log.lock().unwrap().closed = true;
    }
}

impl OutputProbe {
    pub fn scheduled(&self) -> Vec<(f64, usize)> {
        self.log.lock().unwrap().scheduled.clone()
    }

    pub fn set_time(&self, now: f64) {
        self.log.lock().unwrap().now = now;
    }

    /// Finish the oldest in-flight buffer. Returns false if none was pending.
    pub fn complete_next(&self) -> bool {
        let mut log = self.log.lock().unwrap();
        if log.pending.is_empty() {
            return false;
        }
        let _ = log.pending.remove(0).send(());
        true
    }

    pub fn stops(&self) -> usize {
        self.log.lock().unwrap().stops
    }

    pub fn closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }

    pub fn set_close_delay(&self, delay: Duration) {
        self.log.lock().unwrap().close_delay = delay;
    }

    pub fn fail_next_schedule(&self) {
        self.log.lock().unwrap().fail_next = true;
    }
}

/// Hands out prepared devices in order, one per open; once they run out the
/// open fails.
pub struct FakeBackend {
    inputs: Mutex<VecDeque<FakeInput>>,
    outputs: Mutex<VecDeque<FakeOutput>>,
}

impl FakeBackend {
    pub fn new(input: Option<FakeInput>, output: Option<FakeOutput>) -> Self {
        Self {
            inputs: Mutex::new(input.into_iter().collect()),
            outputs: Mutex::new(output.into_iter().collect()),
        }
    }

    /// Queue devices for the next connection.
    pub fn push(&self, input: FakeInput, output: FakeOutput) {
        self.inputs.lock().unwrap().push_back(input);
        self.outputs.lock().unwrap().push_back(output);
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(&self) -> Result<Box<dyn InputDevice>, AudioError> {
        match self.inputs.lock().unwrap().pop_front() {
            Some(input) => Ok(Box::new(input)),
            None => Err(AudioError::Open("no fake microphone".to_string())),
        }
    }

    fn open_output(&self) -> Result<Box<dyn OutputDevice>, AudioError> {
        match self.outputs.lock().unwrap().pop_front() {
            Some(output) => Ok(Box::new(output)),
            None => Err(AudioError::Open("no fake speaker".to_string())),
        }
    }
}

/// Remote end of a `FakeConnector` connection
pub struct FakeRemote {
    pub request: ConnectRequest,
    pub sent: mpsc::UnboundedReceiver<WireMessage>,
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl FakeRemote {
    pub fn send_text(&self, json: serde_json::Value) {
        let _ = self.inbound.send(TransportEvent::Text(json.to_string()));
    }

    /// Next text record the client sent, skipping audio and keep-alives.
    pub async fn next_record(&mut self) -> Option<serde_json::Value> {
        while let Some(msg) = self.sent.recv().await {
            if let WireMessage::Text(text) = msg {
                let value: serde_json::Value = serde_json::from_str(&text).ok()?;
                if value["type"] != "KeepAlive" {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Next binary audio frame the client sent, skipping text records.
    pub async fn next_audio(&mut self) -> Option<Vec<u8>> {
        while let Some(msg) = self.sent.recv().await {
            if let WireMessage::Binary(bytes) = msg {
                return Some(bytes);
            }
        }
        None
    }
}

enum ConnectMode {
    Accept,
    Refuse(TransportError),
    /// Never completes the handshake
    Hang,
}

/// Connector whose connections are driven by the test
pub struct FakeConnector {
    mode: ConnectMode,
    remotes: mpsc::UnboundedSender<FakeRemote>,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                mode: ConnectMode::Accept,
                remotes: tx,
            },
            rx,
        )
    }

    pub fn refusing(error: TransportError) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            mode: ConnectMode::Refuse(error),
            remotes: tx,
        }
    }

    pub fn hanging() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            mode: ConnectMode::Hang,
            remotes: tx,
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, request: ConnectRequest) -> Result<Connection, TransportError> {
        match &self.mode {
            ConnectMode::Accept => {}
            ConnectMode::Refuse(error) => return Err(error.clone()),
            ConnectMode::Hang => std::future::pending::<()>().await,
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.remotes
            .send(FakeRemote {
                request,
                sent: out_rx,
                inbound: in_tx,
            })
            .map_err(|_| TransportError::ConnectionFailed("test dropped the remote".to_string()))?;
        Ok(Connection {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
