use tokio::time::Instant;

/// Lifecycle of one capture unit. A chunk never goes back to `Recording`;
/// a failed chunk is abandoned and capture continues with a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Recording,
    Stopped,
    Sent,
    Failed,
}

/// One fixed-duration capture unit.
#[derive(Debug, Clone)]
pub struct CaptureChunk {
    index: u64,
    started_at: Instant,
    raw_buffer: Vec<u8>,
    state: ChunkState,
}

impl CaptureChunk {
    /// A chunk that has just started recording.
    pub fn recording(index: u64) -> Self {
        Self {
            index,
            started_at: Instant::now(),
            raw_buffer: Vec::new(),
            state: ChunkState::Recording,
        }
    }

    /// A chunk whose capture already finished with `raw_buffer`.
    pub fn stopped(index: u64, raw_buffer: Vec<u8>) -> Self {
        Self {
            index,
            started_at: Instant::now(),
            raw_buffer,
            state: ChunkState::Stopped,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn raw_buffer(&self) -> &[u8] {
        &self.raw_buffer
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn mark_stopped(&mut self, raw_buffer: Vec<u8>) {
        debug_assert_eq!(self.state, ChunkState::Recording);
        self.raw_buffer = raw_buffer;
        self.state = ChunkState::Stopped;
    }

    pub fn mark_sent(&mut self) {
        debug_assert_eq!(self.state, ChunkState::Stopped);
        self.state = ChunkState::Sent;
        // buffer is no longer needed once on the wire
        self.raw_buffer = Vec::new();
    }

    pub fn mark_failed(&mut self) {
        self.state = ChunkState::Failed;
        self.raw_buffer = Vec::new();
    }
}
