//! audio - Capture device seam and its ALSA implementation
//!
//! The orchestrator only sees `CaptureDevice` / `CaptureSession`. Raw PCM
//! capture runs on a dedicated OS thread per session (see `record.rs`).

mod alsa_device;
mod audio_system;
mod record;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CaptureError;

pub use audio_system::{AlsaCaptureDevice, CaptureSettings};

/// Snapshot of a capture session, polled by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStatus {
    pub is_recording: bool,
    /// Audio captured so far.
    pub elapsed: Duration,
}

/// Exclusive handle on the input hardware.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Claim the device. Must precede `open_session`.
    async fn acquire(&mut self) -> Result<(), CaptureError>;

    /// Give the device back. Idempotent.
    async fn release(&mut self);

    /// Start recording into a fresh buffer.
    async fn open_session(&mut self) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// One running capture. Dropping it without `stop` discards the audio.
#[async_trait]
pub trait CaptureSession: Send {
    fn status(&self) -> CaptureStatus;

    /// Stop recording and hand back the raw little-endian PCM.
    async fn stop(&mut self) -> Result<Vec<u8>, CaptureError>;
}
