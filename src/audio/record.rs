use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use super::alsa_device::{self, AlsaParams};
use super::audio_system::CaptureSettings;
use crate::error::CaptureError;

/// PCM accumulated by one record thread.
#[derive(Default)]
pub struct CaptureBuffer {
    bytes: Mutex<Vec<u8>>,
    frames: AtomicU64,
}

impl CaptureBuffer {
    pub fn elapsed(&self, sample_rate: u32) -> Duration {
        let frames = self.frames.load(Ordering::Relaxed);
        Duration::from_micros(frames * 1_000_000 / u64::from(sample_rate.max(1)))
    }

    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.bytes.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn append(&self, samples: &[i16], frames: usize) {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        bytes.reserve(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
    }
}

pub fn record_thread(
    settings: &CaptureSettings,
    running: &AtomicBool,
    buffer: &CaptureBuffer,
    ready: oneshot::Sender<Result<AlsaParams, CaptureError>>,
) {
    // 1. Open ALSA capture device
    let opened = alsa_device::open_capture(
        &settings.device,
        settings.sample_rate,
        u32::from(settings.channels),
    );
    let (pcm, params) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::Start(format!("{:#}", e))));
            return;
        }
    };

    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::Start(e.to_string())));
            return;
        }
    };

    // 2. ALSA read buffer (interleaved i16, one period)
    let channels = params.channels as usize;
    let mut read_buf = vec![0i16; params.period_size * channels];

    // 会话已被丢弃则不再录音
    if ready.send(Ok(params.clone())).is_err() {
        return;
    }

    log::info!(
        "Recording started: rate={}, ch={}, period={}",
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => buffer.append(&read_buf[..frames * channels], frames),
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Recording stopped");
}
