//! ALSA-backed `CaptureDevice`.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks. Each capture session owns one
//! record thread; stopping the session joins it and hands back the PCM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::alsa_device;
use super::record::{record_thread, CaptureBuffer};
use super::{CaptureDevice, CaptureSession, CaptureStatus};
use crate::config::Config;
use crate::error::CaptureError;

/// Capture settings.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device: config.capture_device.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }
}

pub struct AlsaCaptureDevice {
    settings: CaptureSettings,
    acquired: bool,
}

impl AlsaCaptureDevice {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            acquired: false,
        }
    }
}

#[async_trait]
impl CaptureDevice for AlsaCaptureDevice {
    async fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.acquired {
            return Ok(());
        }
        let settings = self.settings.clone();
        // 先试开一次设备，确认可用且参数匹配
        let probe = tokio::task::spawn_blocking(move || {
            alsa_device::open_capture(
                &settings.device,
                settings.sample_rate,
                u32::from(settings.channels),
            )
            .map(drop)
        })
        .await;

        let result = match probe {
            Ok(result) => result.map_err(|e| format!("{:#}", e)),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = result {
            return Err(CaptureError::Acquire {
                device: self.settings.device.clone(),
                reason,
            });
        }

        log::info!("Capture device \"{}\" acquired", self.settings.device);
        self.acquired = true;
        Ok(())
    }

    async fn release(&mut self) {
        if self.acquired {
            log::info!("Capture device \"{}\" released", self.settings.device);
        }
        self.acquired = false;
    }

    async fn open_session(&mut self) -> Result<Box<dyn CaptureSession>, CaptureError> {
        if !self.acquired {
            return Err(CaptureError::NotAcquired);
        }

        let running = Arc::new(AtomicBool::new(true));
        let buffer = Arc::new(CaptureBuffer::default());
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = {
            let running = running.clone();
            let buffer = buffer.clone();
            let settings = self.settings.clone();
            thread::Builder::new()
                .name("audio-record".into())
                .spawn(move || record_thread(&settings, &running, &buffer, ready_tx))
                .map_err(|e| CaptureError::Start(e.to_string()))?
        };

        let params = match ready_rx.await {
            Ok(Ok(params)) => params,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(CaptureError::Start("record thread exited before starting".into())),
        };

        Ok(Box::new(AlsaCaptureSession {
            running,
            buffer,
            sample_rate: params.sample_rate,
            handle: Some(handle),
        }))
    }
}

struct AlsaCaptureSession {
    running: Arc<AtomicBool>,
    buffer: Arc<CaptureBuffer>,
    sample_rate: u32,
    handle: Option<JoinHandle<()>>,
}

#[async_trait]
impl CaptureSession for AlsaCaptureSession {
    fn status(&self) -> CaptureStatus {
        let alive = self.handle.as_ref().is_some_and(|h| !h.is_finished());
        CaptureStatus {
            is_recording: alive && self.running.load(Ordering::Relaxed),
            elapsed: self.buffer.elapsed(self.sample_rate),
        }
    }

    async fn stop(&mut self) -> Result<Vec<u8>, CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return Err(CaptureError::Stop("session already stopped".into()));
        };
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => Ok(self.buffer.take()),
            Ok(Err(_)) => Err(CaptureError::Stop("record thread panicked".into())),
            Err(e) => Err(CaptureError::Stop(e.to_string())),
        }
    }
}

impl Drop for AlsaCaptureSession {
    fn drop(&mut self) {
        // Record thread exits on its next period; no need to join here.
        self.running.store(false, Ordering::SeqCst);
    }
}
