//! One-shot upload path: `POST {API_BASE_URL}/analyze` with a WAV file.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::ACCEPT;
use reqwest::multipart;
use url::Url;

use crate::config::Config;
use crate::protocol::AnalysisResult;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

pub struct AnalyzeClient {
    client: reqwest::Client,
    endpoint: Url,
    max_retries: u32,
    retry_delay: Duration,
}

impl AnalyzeClient {
    pub fn new(endpoint: Url, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            max_retries,
            retry_delay,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let endpoint = config.analyze_endpoint()?;
        Ok(Self::new(endpoint, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY))
    }

    /// Upload a complete WAV file and decode the verdict.
    pub async fn analyze_wav(&self, wav: Vec<u8>) -> Result<AnalysisResult> {
        log::info!("Uploading {} bytes to {}", wav.len(), self.endpoint);
        let value = with_retries(self.max_retries, self.retry_delay, |_| self.post(wav.clone())).await?;
        let result = AnalysisResult::from_value(value).context("unexpected analyze response")?;
        log::info!(
            "Analysis: suspicious={}, confidence={:.2}",
            result.suspicious(),
            result.confidence()
        );
        Ok(result)
    }

    async fn post(&self, wav: Vec<u8>) -> Result<serde_json::Value> {
        let file_part = multipart::Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new().part("file", file_part);

        let resp = self
            .client
            .post(self.endpoint.clone())
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("analyze API error {}: {}", status, body);
        }

        Ok(resp.json().await?)
    }
}

/// Run `op` once, then up to `retries` more times with a fixed `delay`
/// between attempts. `op` receives the 1-based attempt number.
pub async fn with_retries<T, F, Fut>(retries: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt <= retries => {
                log::warn!("Attempt {} failed: {:#}. Retrying in {:?}...", attempt, e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.context(format!("giving up after {} attempts", attempt))),
        }
    }
}
