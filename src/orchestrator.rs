//! Streaming session driver.
//!
//! One driver task owns the capture device, the session state and the
//! connection for the current session. Caller requests, capture status
//! ticks, retry timers, connection events and chunk send outcomes are all
//! handled as discrete steps of that task, so none of them ever interleave.
//! Sends run on a separate worker task that drains a FIFO of stopped
//! chunks; it is the only caller of `ConnectionManager::send`.

use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::audio::{CaptureDevice, CaptureSession};
use crate::chunk::CaptureChunk;
use crate::chunk_transport::{ChunkTransport, SendReport};
use crate::config::Config;
use crate::error::{SessionError, StreamError, TransportError};
use crate::net_link::{ConnectionEvent, ConnectionManager, ConnectionSettings, Connector};
use crate::protocol::AnalysisResult;
use crate::sink::AnalysisSink;

/// Caller-visible lifecycle of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Initializing,
    Streaming,
    Stopping,
}

enum Command {
    Start(oneshot::Sender<Result<(), StreamError>>),
    Stop(oneshot::Sender<()>),
    History(oneshot::Sender<Vec<AnalysisResult>>),
    ChunkIndex(oneshot::Sender<u64>),
}

/// Handle to a running driver. Cheap to clone; the driver shuts down (and
/// tears down any active session) once every handle is dropped.
#[derive(Clone)]
pub struct StreamingOrchestrator {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<Phase>,
}

impl StreamingOrchestrator {
    pub fn spawn(
        config: Config,
        device: Box<dyn CaptureDevice>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn AnalysisSink>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::channel(16);
        let (phase_tx, phase) = watch::channel(Phase::Idle);
        let driver = Driver {
            config,
            device,
            connector,
            sink,
            phase: phase_tx,
            session: SessionState::default(),
            link: None,
            events: None,
            outcomes: None,
        };
        tokio::spawn(driver.run(commands_rx));
        Self { commands, phase }
    }

    /// Connect, acquire the capture device and begin streaming.
    pub async fn start(&self) -> Result<(), StreamError> {
        self.request(Command::Start).await?
    }

    /// End the session. A no-op while idle or already stopping.
    ///
    /// Commands are handled one at a time, so a `stop` issued while a
    /// `start` is still `Initializing` is queued behind it: it waits for the
    /// connect (at most `CONNECT_TIMEOUT`) and the device probe to finish,
    /// then tears down whatever `start` built.
    pub async fn stop(&self) -> Result<(), StreamError> {
        self.request(Command::Stop).await
    }

    /// Results received during the current session, in arrival order.
    pub async fn history(&self) -> Result<Vec<AnalysisResult>, StreamError> {
        self.request(Command::History).await
    }

    /// Index the next capture chunk will get.
    pub async fn chunk_index(&self) -> Result<u64, StreamError> {
        self.request(Command::ChunkIndex).await
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn is_streaming(&self) -> bool {
        self.phase() == Phase::Streaming
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, StreamError> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| StreamError::Closed)?;
        reply_rx.await.map_err(|_| StreamError::Closed)
    }
}

// ======================== Driver ========================

struct ActiveChunk {
    chunk: CaptureChunk,
    session: Box<dyn CaptureSession>,
}

/// Everything that belongs to one start/stop cycle.
#[derive(Default)]
struct SessionState {
    id: Option<Uuid>,
    chunk_index: u64,
    history: Vec<AnalysisResult>,
    /// The only chunk in `Recording`. Taking it is the claim on the device.
    recording: Option<ActiveChunk>,
    cleanup_in_progress: bool,
    /// When the next capture open is due (settle delay or retry).
    open_at: Option<Instant>,
    device_acquired: bool,
}

enum ChunkOutcome {
    Sent(SendReport),
    Failed(TransportError),
}

/// Per-session connection and send worker.
struct Link {
    manager: ConnectionManager,
    chunks: mpsc::UnboundedSender<CaptureChunk>,
    active: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

struct Driver {
    config: Config,
    device: Box<dyn CaptureDevice>,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn AnalysisSink>,
    phase: watch::Sender<Phase>,
    session: SessionState,
    link: Option<Link>,
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    outcomes: Option<mpsc::UnboundedReceiver<ChunkOutcome>>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut status = interval(self.config.status_interval);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                _ = status.tick(), if self.session.recording.is_some() => {
                    self.on_status_tick().await;
                }
                _ = sleep_until_opt(self.session.open_at) => {
                    self.session.open_at = None;
                    self.open_chunk().await;
                }
                event = recv_opt(self.events.as_mut()) => self.on_event(event).await,
                outcome = recv_opt(self.outcomes.as_mut()) => self.on_outcome(outcome),
            }
        }
        log::debug!("Streaming driver exited");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                self.teardown().await;
                let _ = reply.send(());
            }
            Command::History(reply) => {
                let _ = reply.send(self.session.history.clone());
            }
            Command::ChunkIndex(reply) => {
                let _ = reply.send(self.session.chunk_index);
            }
        }
    }

    fn current_phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            log::info!("Session phase {:?} -> {:?}", previous, phase);
        }
    }

    async fn start(&mut self) -> Result<(), StreamError> {
        if self.current_phase() != Phase::Idle {
            return Err(StreamError::AlreadyActive);
        }
        let settings = ConnectionSettings::from_config(&self.config)?;

        self.set_phase(Phase::Initializing);
        let id = Uuid::new_v4();
        log::info!("Starting session {} -> {}", id, settings.endpoint);

        // 1. Connect
        let (manager, events) = ConnectionManager::new(settings, self.connector.clone());
        if let Err(e) = manager.connect().await {
            log::error!("Session {} failed to connect: {}", id, e);
            manager.disconnect().await;
            self.set_phase(Phase::Idle);
            return Err(e.into());
        }

        // 2. Acquire capture device
        if let Err(e) = self.device.acquire().await {
            log::error!("Session {} failed to acquire capture device: {}", id, e);
            manager.disconnect().await;
            self.set_phase(Phase::Idle);
            return Err(e.into());
        }

        // 3. Send worker
        let active = Arc::new(AtomicBool::new(true));
        let (chunks, chunks_rx) = mpsc::unbounded_channel();
        let (outcomes, outcomes_rx) = mpsc::unbounded_channel();
        let transport = ChunkTransport::from_config(manager.clone(), &self.config);
        let worker = tokio::spawn(send_worker(transport, chunks_rx, outcomes, active.clone()));

        self.link = Some(Link {
            manager,
            chunks,
            active,
            worker,
        });
        self.events = Some(events);
        self.outcomes = Some(outcomes_rx);

        // 4. First chunk opens once the device has settled
        self.session = SessionState {
            id: Some(id),
            device_acquired: true,
            open_at: Some(Instant::now() + self.config.settle_delay),
            ..SessionState::default()
        };
        self.set_phase(Phase::Streaming);
        Ok(())
    }

    async fn open_chunk(&mut self) {
        if self.current_phase() != Phase::Streaming
            || self.session.cleanup_in_progress
            || self.session.recording.is_some()
        {
            return;
        }

        match self.device.open_session().await {
            Ok(session) => {
                let chunk = CaptureChunk::recording(self.session.chunk_index);
                self.session.chunk_index += 1;
                log::info!("Chunk #{} recording", chunk.index());
                self.session.recording = Some(ActiveChunk { chunk, session });
            }
            Err(e) => {
                log::warn!("Failed to open capture session: {}", e);
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        if self.current_phase() != Phase::Streaming || self.session.open_at.is_some() {
            return;
        }
        let delay = self.config.chunk_retry_delay;
        log::info!("Retrying capture in {:?}", delay);
        self.session.open_at = Some(Instant::now() + delay);
    }

    async fn on_status_tick(&mut self) {
        let status = match &self.session.recording {
            Some(active) => active.session.status(),
            None => return,
        };

        if !status.is_recording {
            if let Some(ActiveChunk { mut chunk, .. }) = self.session.recording.take() {
                log::warn!(
                    "Chunk #{} capture ended unexpectedly after {:?}",
                    chunk.index(),
                    chunk.started_at().elapsed()
                );
                chunk.mark_failed();
            }
            self.schedule_retry();
            return;
        }

        if status.elapsed >= self.config.chunk_duration {
            self.rotate().await;
        }
    }

    async fn rotate(&mut self) {
        // Claim the chunk before the first await; nothing else may touch it
        let Some(ActiveChunk {
            mut chunk,
            mut session,
        }) = self.session.recording.take()
        else {
            return;
        };

        match session.stop().await {
            Ok(buffer) => {
                chunk.mark_stopped(buffer);
                log::info!(
                    "Chunk #{} stopped ({} bytes, {:?})",
                    chunk.index(),
                    chunk.raw_buffer().len(),
                    chunk.started_at().elapsed()
                );
                self.enqueue(chunk);
                self.open_chunk().await;
            }
            Err(e) => {
                log::warn!("Chunk #{} failed to stop: {}", chunk.index(), e);
                chunk.mark_failed();
                self.schedule_retry();
            }
        }
    }

    fn enqueue(&mut self, chunk: CaptureChunk) {
        let Some(link) = &self.link else {
            return;
        };
        if let Err(e) = link.chunks.send(chunk) {
            log::warn!("Send worker is gone, dropping chunk #{}", e.0.index());
        }
    }

    fn on_outcome(&mut self, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Sent(report) => log::info!(
                "Chunk #{} sent ({} bytes in {} fragments)",
                report.chunk_index,
                report.bytes,
                report.fragments
            ),
            ChunkOutcome::Failed(e) => {
                log::warn!("{}", e);
                self.schedule_retry();
            }
        }
    }

    async fn on_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => log::info!("Analyzer link up"),
            ConnectionEvent::Disconnected => log::warn!("Analyzer link down, reconnecting"),
            ConnectionEvent::Analysis(result) => {
                if self.current_phase() != Phase::Streaming {
                    return;
                }
                self.sink.on_result(&result);
                self.session.history.push(result);
            }
            ConnectionEvent::AnalyzerError(notification) => {
                self.sink.on_error(&SessionError::Analyzer(notification));
            }
            ConnectionEvent::Error(e) => {
                self.sink.on_error(&SessionError::Connection(e));
            }
            ConnectionEvent::PermanentlyFailed(e) => {
                self.sink.on_error(&SessionError::Connection(e));
                self.teardown().await;
            }
        }
    }

    async fn teardown(&mut self) {
        if matches!(self.current_phase(), Phase::Idle | Phase::Stopping)
            || self.session.cleanup_in_progress
        {
            return;
        }
        self.session.cleanup_in_progress = true;
        self.set_phase(Phase::Stopping);
        self.session.open_at = None;

        let link = self.link.take();
        if let Some(link) = &link {
            link.active.store(false, Ordering::SeqCst);
        }

        // 1. Partial chunk is dropped, never sent
        if let Some(ActiveChunk {
            mut chunk,
            mut session,
        }) = self.session.recording.take()
        {
            match session.stop().await {
                Ok(buffer) => log::info!(
                    "Discarding partial chunk #{} ({} bytes)",
                    chunk.index(),
                    buffer.len()
                ),
                Err(e) => log::warn!("Chunk #{} failed to stop: {}", chunk.index(), e),
            }
            chunk.mark_failed();
        }

        // 2. Close the link; in-flight sends finish or fail on their own
        if let Some(Link {
            manager,
            chunks,
            worker,
            ..
        }) = link
        {
            drop(chunks);
            manager.disconnect().await;
            drop(worker);
        }
        self.events = None;
        self.outcomes = None;

        // 3. Release the device and let it settle
        if self.session.device_acquired {
            self.device.release().await;
            sleep(self.config.settle_delay).await;
        }

        if let Some(id) = self.session.id {
            log::info!(
                "Session {} stopped after {} chunks, {} results",
                id,
                self.session.chunk_index,
                self.session.history.len()
            );
        }
        self.session = SessionState::default();
        self.set_phase(Phase::Idle);
    }
}

async fn send_worker(
    transport: ChunkTransport<ConnectionManager>,
    mut chunks: mpsc::UnboundedReceiver<CaptureChunk>,
    outcomes: mpsc::UnboundedSender<ChunkOutcome>,
    active: Arc<AtomicBool>,
) {
    while let Some(mut chunk) = chunks.recv().await {
        if !active.load(Ordering::SeqCst) {
            log::debug!("Session stopping, skipping chunk #{}", chunk.index());
            continue;
        }
        let outcome = match transport.send(&chunk).await {
            Ok(report) => {
                chunk.mark_sent();
                ChunkOutcome::Sent(report)
            }
            Err(e) => {
                chunk.mark_failed();
                ChunkOutcome::Failed(e)
            }
        };
        if outcomes.send(outcome).is_err() {
            break;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Next item from an optional receiver; never resolves when absent or closed.
async fn recv_opt<T>(rx: Option<&mut mpsc::UnboundedReceiver<T>>) -> T {
    if let Some(rx) = rx {
        if let Some(item) = rx.recv().await {
            return item;
        }
    }
    pending().await
}
