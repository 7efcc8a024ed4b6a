//! In-memory stand-ins for the network and the capture hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use crate::audio::{CaptureDevice, CaptureSession, CaptureStatus};
use crate::config::Config;
use crate::error::{CaptureError, ConnectionError, SessionError};
use crate::net_link::{Connector, Frame, FrameSink, FrameStream, LinkHalves};
use crate::protocol::AnalysisResult;
use crate::sink::AnalysisSink;

/// Config pointing at `ws://analyzer.test/ws`, binary framing, stock timings.
pub fn test_config() -> Config {
    test_config_with(&[])
}

pub fn test_config_with(overrides: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = HashMap::from([
        ("WS_URL".to_string(), "ws://analyzer.test".to_string()),
        ("WIRE_FRAMING".to_string(), "binary".to_string()),
    ]);
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }
    Config::from_lookup(|key| env.get(key).cloned()).unwrap()
}

// ======================== Network ========================

/// What the next `connect` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Accept,
    Refuse,
    Hang,
}

pub struct MockConnector {
    plans: Mutex<VecDeque<Plan>>,
    fallback: Plan,
    opens: AtomicUsize,
    peers: Mutex<Vec<MockPeer>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    /// Accepts every connection.
    pub fn new() -> Arc<Self> {
        Self::with_plans(std::iter::empty(), Plan::Accept)
    }

    /// Follows `plans` in order, then `fallback` forever.
    pub fn with_plans(plans: impl IntoIterator<Item = Plan>, fallback: Plan) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(plans.into_iter().collect()),
            fallback,
            opens: AtomicUsize::new(0),
            peers: Mutex::new(Vec::new()),
            log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Connect calls so far, accepted or not.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// `open#n` / `close#n` for accepted links, in order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// The `i`-th accepted link.
    pub fn peer(&self, i: usize) -> MockPeer {
        self.peers.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &Url) -> Result<LinkHalves, ConnectionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match plan {
            Plan::Refuse => Err(ConnectionError::Handshake("connection refused".into())),
            Plan::Hang => std::future::pending().await,
            Plan::Accept => {
                let (inbound, inbound_rx) = mpsc::unbounded_channel();
                let mut peers = self.peers.lock().unwrap();
                let peer = MockPeer(Arc::new(PeerState {
                    id: peers.len() + 1,
                    sent: Mutex::new(Vec::new()),
                    closed: AtomicBool::new(false),
                    fail_sends: AtomicBool::new(false),
                    inbound,
                }));
                peers.push(peer.clone());
                self.log.lock().unwrap().push(format!("open#{}", peer.0.id));
                let sink = MockSink {
                    peer: peer.clone(),
                    log: self.log.clone(),
                };
                Ok((Box::new(sink), Box::new(MockStream(inbound_rx))))
            }
        }
    }
}

struct PeerState {
    id: usize,
    sent: Mutex<Vec<Frame>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
    inbound: mpsc::UnboundedSender<Result<Frame, ConnectionError>>,
}

/// The analyzer's side of one accepted link.
#[derive(Clone)]
pub struct MockPeer(Arc<PeerState>);

impl MockPeer {
    pub fn sent(&self) -> Vec<Frame> {
        self.0.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    pub fn push_text(&self, text: &str) {
        let _ = self.0.inbound.send(Ok(Frame::Text(text.to_string())));
    }

    pub fn push_binary(&self, data: &[u8]) {
        let _ = self.0.inbound.send(Ok(Frame::Binary(data.to_vec())));
    }

    /// Drop the link from the far side.
    pub fn hang_up(&self) {
        let _ = self
            .0
            .inbound
            .send(Err(ConnectionError::Closed("peer hung up".into())));
    }

    /// Make every later send fail.
    pub fn fail_sends(&self) {
        self.0.fail_sends.store(true, Ordering::SeqCst);
    }
}

struct MockSink {
    peer: MockPeer,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if self.peer.0.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed("broken pipe".into()));
        }
        self.peer.0.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn close(&mut self) {
        self.peer.0.closed.store(true, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("close#{}", self.peer.0.id));
    }
}

struct MockStream(mpsc::UnboundedReceiver<Result<Frame, ConnectionError>>);

#[async_trait]
impl FrameStream for MockStream {
    async fn next(&mut self) -> Option<Result<Frame, ConnectionError>> {
        self.0.recv().await
    }
}

// ======================== Capture ========================

/// Shared view into a `MockCaptureDevice` after it was boxed.
#[derive(Default)]
pub struct DeviceProbe {
    acquires: AtomicUsize,
    releases: AtomicUsize,
    opens: AtomicUsize,
    recording: AtomicUsize,
    max_recording: AtomicUsize,
    fail_acquire: AtomicBool,
    failing_opens: AtomicUsize,
    interrupt: AtomicBool,
    log: Mutex<Vec<String>>,
}

impl DeviceProbe {
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Successful session opens.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn recording(&self) -> usize {
        self.recording.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously recording sessions observed.
    pub fn max_recording(&self) -> usize {
        self.max_recording.load(Ordering::SeqCst)
    }

    pub fn fail_acquire(&self) {
        self.fail_acquire.store(true, Ordering::SeqCst);
    }

    /// The recording session stops on its own at its next status check.
    pub fn interrupt_capture(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// Make the next `n` session opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

/// Each session's buffer is 64 bytes of its open sequence number.
pub struct MockCaptureDevice {
    probe: Arc<DeviceProbe>,
    acquired: bool,
    next_seq: u8,
}

impl MockCaptureDevice {
    pub fn new() -> (Self, Arc<DeviceProbe>) {
        let probe = Arc::new(DeviceProbe::default());
        let device = Self {
            probe: probe.clone(),
            acquired: false,
            next_seq: 0,
        };
        (device, probe)
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    async fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.probe.fail_acquire.load(Ordering::SeqCst) {
            return Err(CaptureError::Acquire {
                device: "mock".into(),
                reason: "device busy".into(),
            });
        }
        self.probe.acquires.fetch_add(1, Ordering::SeqCst);
        self.probe.record("acquire".into());
        self.acquired = true;
        Ok(())
    }

    async fn release(&mut self) {
        if self.acquired {
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
            self.probe.record("release".into());
        }
        self.acquired = false;
    }

    async fn open_session(&mut self) -> Result<Box<dyn CaptureSession>, CaptureError> {
        if !self.acquired {
            return Err(CaptureError::NotAcquired);
        }
        let failing = self.probe.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.probe.failing_opens.store(failing - 1, Ordering::SeqCst);
            self.probe.record("open-failed".into());
            return Err(CaptureError::Start("audio session interrupted".into()));
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        let now_recording = self.probe.recording.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_recording.fetch_max(now_recording, Ordering::SeqCst);
        self.probe.record(format!("open#{}", seq));

        Ok(Box::new(MockSession {
            probe: self.probe.clone(),
            seq,
            opened_at: Instant::now(),
            stopped: false,
            ended: AtomicBool::new(false),
        }))
    }
}

struct MockSession {
    probe: Arc<DeviceProbe>,
    seq: u8,
    opened_at: Instant,
    stopped: bool,
    ended: AtomicBool,
}

impl MockSession {
    fn finish(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.probe.recording.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl CaptureSession for MockSession {
    fn status(&self) -> CaptureStatus {
        if !self.stopped && self.probe.interrupt.swap(false, Ordering::SeqCst) {
            self.ended.store(true, Ordering::SeqCst);
            self.probe.record(format!("ended#{}", self.seq));
        }
        let ended = self.ended.load(Ordering::SeqCst);
        CaptureStatus {
            is_recording: !self.stopped && !ended,
            elapsed: if self.stopped || ended {
                Duration::ZERO
            } else {
                self.opened_at.elapsed()
            },
        }
    }

    async fn stop(&mut self) -> Result<Vec<u8>, CaptureError> {
        self.finish();
        self.probe.record(format!("stop#{}", self.seq));
        Ok(vec![self.seq; 64])
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.finish();
    }
}

// ======================== Sink ========================

#[derive(Default)]
pub struct RecordingSink {
    results: Mutex<Vec<AnalysisResult>>,
    errors: Mutex<Vec<SessionError>>,
}

impl RecordingSink {
    pub fn results(&self) -> Vec<AnalysisResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<SessionError> {
        self.errors.lock().unwrap().clone()
    }
}

impl AnalysisSink for RecordingSink {
    fn on_result(&self, result: &AnalysisResult) {
        self.results.lock().unwrap().push(result.clone());
    }

    fn on_error(&self, error: &SessionError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}
