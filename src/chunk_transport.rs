//! Turns a captured chunk into wire frames and sends them in order.

use std::str::FromStr;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::chunk::CaptureChunk;
use crate::config::Config;
use crate::error::{ConnectionError, TransportError};
use crate::net_link::{ConnectionManager, Frame};
use crate::protocol::audio_envelope;
use crate::wav::{self, WavFormat};

/// How each unit is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFraming {
    /// Raw bytes as binary messages. Deprecated variant kept for older analyzers.
    Binary,
    /// `{"audio": <base64>}` as text messages.
    Json,
}

impl FromStr for WireFraming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(WireFraming::Binary),
            "json" => Ok(WireFraming::Json),
            other => Err(format!("unknown wire framing {:?}, expected \"json\" or \"binary\"", other)),
        }
    }
}

/// How a chunk's buffer is split into units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Raw PCM in slices of at most `fragment_size` bytes.
    Fragmented { fragment_size: usize },
    /// The whole chunk as one unit, wrapped in the canonical WAV header.
    Whole,
}

/// Where frames go. Implemented by `ConnectionManager`.
#[async_trait]
pub trait FrameSender: Send + Sync {
    async fn send_frame(&self, frame: Frame) -> Result<(), ConnectionError>;
}

#[async_trait]
impl FrameSender for ConnectionManager {
    async fn send_frame(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.send(frame).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub chunk_index: u64,
    pub fragments: usize,
    pub bytes: usize,
}

pub struct ChunkTransport<S> {
    sender: S,
    framing: WireFraming,
    mode: TransportMode,
    format: WavFormat,
}

impl<S: FrameSender> ChunkTransport<S> {
    pub fn new(sender: S, framing: WireFraming, mode: TransportMode, format: WavFormat) -> Self {
        Self {
            sender,
            framing,
            mode,
            format,
        }
    }

    pub fn from_config(sender: S, config: &Config) -> Self {
        Self::new(
            sender,
            config.wire_framing,
            config.transport_mode,
            WavFormat::new(config.sample_rate, config.channels),
        )
    }

    /// Wire frames for `raw_buffer`, in send order.
    pub fn encode(&self, raw_buffer: &[u8]) -> Vec<Frame> {
        match self.mode {
            TransportMode::Fragmented { fragment_size } => raw_buffer
                .chunks(fragment_size.max(1))
                .map(|fragment| self.frame(fragment))
                .collect(),
            TransportMode::Whole => vec![self.frame(&wav::wrap_pcm(self.format, raw_buffer))],
        }
    }

    fn frame(&self, unit: &[u8]) -> Frame {
        match self.framing {
            WireFraming::Binary => Frame::Binary(unit.to_vec()),
            WireFraming::Json => Frame::Text(audio_envelope(&STANDARD.encode(unit))),
        }
    }

    /// Send every frame of `chunk`. Fragment `i + 1` is only sent after
    /// fragment `i` was accepted; the first failure aborts the rest.
    pub async fn send(&self, chunk: &CaptureChunk) -> Result<SendReport, TransportError> {
        let frames = self.encode(chunk.raw_buffer());
        let total_fragments = frames.len();

        for (i, frame) in frames.into_iter().enumerate() {
            if let Err(source) = self.sender.send_frame(frame).await {
                return Err(TransportError {
                    chunk_index: chunk.index(),
                    fragments_sent: i,
                    total_fragments,
                    source,
                });
            }
            log::debug!(
                "Chunk #{} fragment {}/{} sent",
                chunk.index(),
                i + 1,
                total_fragments
            );
        }

        Ok(SendReport {
            chunk_index: chunk.index(),
            fragments: total_fragments,
            bytes: chunk.raw_buffer().len(),
        })
    }
}
