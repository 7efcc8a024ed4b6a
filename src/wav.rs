//! Canonical 44-byte RIFF/WAVE header for 16-bit PCM.
//!
//! The analyzer parses this header byte-for-byte, so the layout is fixed:
//! four-character codes in ASCII order, every numeric field little-endian.

pub const HEADER_LEN: usize = 44;

/// PCM layout described by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    /// 16 kHz, mono, 16-bit.
    pub const CANONICAL: WavFormat = WavFormat {
        sample_rate: 16_000,
        channels: 1,
        bits_per_sample: 16,
    };

    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }

    /// Saturates instead of wrapping for formats no header can describe.
    pub fn block_align(&self) -> u16 {
        let bytes = u32::from(self.channels) * u32::from(self.bits_per_sample) / 8;
        u16::try_from(bytes).unwrap_or(u16::MAX)
    }

    pub fn byte_rate(&self) -> u32 {
        let bytes = u64::from(self.sample_rate) * u64::from(self.channels) * u64::from(self.bits_per_sample) / 8;
        u32::try_from(bytes).unwrap_or(u32::MAX)
    }
}

impl Default for WavFormat {
    fn default() -> Self {
        Self::CANONICAL
    }
}

/// Header for `pcm_len` bytes of PCM data.
pub fn header(format: WavFormat, pcm_len: u32) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];

    // RIFF chunk
    buf[0..4].copy_from_slice(b"RIFF");
    buf[4..8].copy_from_slice(&(36u32.saturating_add(pcm_len)).to_le_bytes());
    buf[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    buf[12..16].copy_from_slice(b"fmt ");
    buf[16..20].copy_from_slice(&16u32.to_le_bytes());
    buf[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    buf[22..24].copy_from_slice(&format.channels.to_le_bytes());
    buf[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    buf[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    buf[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    buf[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    buf[36..40].copy_from_slice(b"data");
    buf[40..44].copy_from_slice(&pcm_len.to_le_bytes());

    buf
}

/// Header followed by the PCM bytes.
pub fn wrap_pcm(format: WavFormat, pcm: &[u8]) -> Vec<u8> {
    let pcm_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX - 36);
    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());
    out.extend_from_slice(&header(format, pcm_len));
    out.extend_from_slice(pcm);
    out
}

/// Whether `bytes` already starts with a RIFF/WAVE header.
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}
