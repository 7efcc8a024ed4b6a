use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::chunk_transport::{TransportMode, WireFraming};
use crate::error::ConfigurationError;

// 采样参数的合法范围
const SAMPLE_RATES: RangeInclusive<u32> = 8_000..=192_000;
const CHANNELS: RangeInclusive<u16> = 1..=8;

/// Runtime configuration.
///
/// Every field is read from the environment first and falls back to the
/// value compiled in from `config.toml` by `build.rs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // 网络配置
    pub api_base_url: Option<String>,
    pub ws_url: Option<String>,

    // 音频配置
    pub capture_device: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_duration: Duration,

    // 传输配置
    pub wire_framing: WireFraming,
    pub transport_mode: TransportMode,

    // 连接配置
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,

    // 会话配置
    pub chunk_retry_delay: Duration,
    pub settle_delay: Duration,
    pub status_interval: Duration,
}

impl Config {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str, default: &str| -> Option<String> {
            Some(get(key, default)).filter(|v| !v.is_empty())
        };

        let fragment_size: usize = parse("FRAGMENT_SIZE", &get("FRAGMENT_SIZE", env!("DEFAULT_FRAGMENT_SIZE")))?;
        if fragment_size == 0 {
            return Err(ConfigurationError::Invalid {
                key: "FRAGMENT_SIZE",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        let sample_rate: u32 = parse("SAMPLE_RATE", &get("SAMPLE_RATE", env!("DEFAULT_SAMPLE_RATE")))?;
        in_range("SAMPLE_RATE", sample_rate, SAMPLE_RATES)?;
        let channels: u16 = parse("CHANNELS", &get("CHANNELS", env!("DEFAULT_CHANNELS")))?;
        in_range("CHANNELS", channels, CHANNELS)?;
        let transport_mode = match get("TRANSPORT_MODE", env!("DEFAULT_TRANSPORT_MODE")).as_str() {
            "fragmented" => TransportMode::Fragmented { fragment_size },
            "whole" => TransportMode::Whole,
            other => {
                return Err(ConfigurationError::Invalid {
                    key: "TRANSPORT_MODE",
                    value: other.to_string(),
                    reason: "expected \"fragmented\" or \"whole\"".to_string(),
                })
            }
        };

        Ok(Self {
            api_base_url: optional("API_BASE_URL", env!("DEFAULT_API_BASE_URL")),
            ws_url: optional("WS_URL", env!("DEFAULT_WS_URL")),

            capture_device: get("CAPTURE_DEVICE", env!("DEFAULT_CAPTURE_DEVICE")),
            sample_rate,
            channels,
            chunk_duration: nonzero_millis("CHUNK_DURATION", &get("CHUNK_DURATION", env!("DEFAULT_CHUNK_DURATION")))?,

            wire_framing: parse("WIRE_FRAMING", &get("WIRE_FRAMING", env!("DEFAULT_WIRE_FRAMING")))?,
            transport_mode,

            connect_timeout: millis("CONNECT_TIMEOUT", &get("CONNECT_TIMEOUT", env!("DEFAULT_CONNECT_TIMEOUT")))?,
            send_timeout: millis("SEND_TIMEOUT", &get("SEND_TIMEOUT", env!("DEFAULT_SEND_TIMEOUT")))?,
            reconnect_base_delay: millis(
                "RECONNECT_BASE_DELAY",
                &get("RECONNECT_BASE_DELAY", env!("DEFAULT_RECONNECT_BASE_DELAY")),
            )?,
            max_reconnect_attempts: parse(
                "MAX_RECONNECT_ATTEMPTS",
                &get("MAX_RECONNECT_ATTEMPTS", env!("DEFAULT_MAX_RECONNECT_ATTEMPTS")),
            )?,

            chunk_retry_delay: millis("CHUNK_RETRY_DELAY", &get("CHUNK_RETRY_DELAY", env!("DEFAULT_CHUNK_RETRY_DELAY")))?,
            settle_delay: millis("SETTLE_DELAY", &get("SETTLE_DELAY", env!("DEFAULT_SETTLE_DELAY")))?,
            status_interval: nonzero_millis("STATUS_INTERVAL", &get("STATUS_INTERVAL", env!("DEFAULT_STATUS_INTERVAL")))?,
        })
    }

    /// `{WS_URL}/ws`, with `http(s)` rewritten to `ws(s)`.
    pub fn streaming_endpoint(&self) -> Result<Url, ConfigurationError> {
        let base = self
            .ws_url
            .as_deref()
            .ok_or(ConfigurationError::Missing("WS_URL"))?
            .trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        endpoint("WS_URL", &format!("{}/ws", base))
    }

    /// `{API_BASE_URL}/analyze` for the one-shot upload path.
    pub fn analyze_endpoint(&self) -> Result<Url, ConfigurationError> {
        let base = self
            .api_base_url
            .as_deref()
            .ok_or(ConfigurationError::Missing("API_BASE_URL"))?
            .trim_end_matches('/');
        endpoint("API_BASE_URL", &format!("{}/analyze", base))
    }
}

fn endpoint(key: &'static str, raw: &str) -> Result<Url, ConfigurationError> {
    Url::parse(raw).map_err(|e| ConfigurationError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigurationError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn millis(key: &'static str, raw: &str) -> Result<Duration, ConfigurationError> {
    parse::<u64>(key, raw).map(Duration::from_millis)
}

/// Periods that drive timers must not be zero.
fn nonzero_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigurationError> {
    let duration = millis(key, raw)?;
    if duration.is_zero() {
        return Err(ConfigurationError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

fn in_range<T>(key: &'static str, value: T, range: RangeInclusive<T>) -> Result<(), ConfigurationError>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        return Ok(());
    }
    Err(ConfigurationError::Invalid {
        key,
        value: value.to_string(),
        reason: format!("expected {}..={}", range.start(), range.end()),
    })
}
