//! Analyzer wire messages.
//!
//! Inbound: one JSON object per text message, either an analysis result or an
//! `{"error": ...}` envelope. Outbound: raw fragment bytes or `{"audio": <base64>}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ProtocolError;

/// Category tag of a detected span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanCategory {
    Otp,
    RemoteAccess,
    SocialEngineering,
}

/// A time-bounded region of suspicious content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(rename = "start")]
    pub start_sec: f64,
    #[serde(rename = "end")]
    pub end_sec: f64,
    pub text: String,
    #[serde(rename = "type")]
    pub category: SpanCategory,
}

// 服务端下发的分析结果原始格式
#[derive(Deserialize)]
struct RawAnalysis {
    suspicious: bool,
    confidence: f64,
    #[serde(default)]
    sentiments: Option<String>,
    #[serde(default)]
    reasons: Option<Vec<String>>,
    #[serde(default)]
    timestamps: Option<Vec<Span>>,
}

/// One decoded analysis update. Only produced by decoding a wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    suspicious: bool,
    confidence: f64,
    #[serde(rename = "sentiments")]
    sentiment: String,
    reasons: Vec<String>,
    #[serde(rename = "timestamps")]
    detected_spans: Vec<Span>,
}

impl AnalysisResult {
    pub fn suspicious(&self) -> bool {
        self.suspicious
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn sentiment(&self) -> &str {
        &self.sentiment
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn detected_spans(&self) -> &[Span] {
        &self.detected_spans
    }

    /// Decode a JSON object that is known not to be an error envelope.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let raw: RawAnalysis =
            serde_json::from_value(value).map_err(|e| ProtocolError::Schema(e.to_string()))?;
        if !(0.0..=1.0).contains(&raw.confidence) {
            return Err(ProtocolError::ConfidenceOutOfRange(raw.confidence));
        }
        Ok(Self {
            suspicious: raw.suspicious,
            confidence: raw.confidence,
            sentiment: raw.sentiments.unwrap_or_default(),
            reasons: raw.reasons.unwrap_or_default(),
            detected_spans: raw.timestamps.unwrap_or_default(),
        })
    }
}

/// The analyzer reported a failure instead of a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorNotification {
    pub message: String,
    pub code: Option<String>,
    /// Free-form context the analyzer attached, passed through untouched.
    pub details: Option<Value>,
}

/// Closed set of things an inbound text message can be.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Analysis(AnalysisResult),
    Error(ErrorNotification),
    Malformed(ProtocolError),
}

impl InboundMessage {
    pub fn decode(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return InboundMessage::Malformed(ProtocolError::NotJson(e.to_string())),
        };
        let Some(object) = value.as_object() else {
            return InboundMessage::Malformed(ProtocolError::NotAnObject);
        };

        if let Some(error) = object.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let code = object.get("code").and_then(|c| c.as_str()).map(str::to_string);
            let details = object.get("details").filter(|d| !d.is_null()).cloned();
            return InboundMessage::Error(ErrorNotification {
                message,
                code,
                details,
            });
        }

        match AnalysisResult::from_value(value) {
            Ok(result) => InboundMessage::Analysis(result),
            Err(e) => InboundMessage::Malformed(e),
        }
    }
}

/// JSON envelope used by the `json` wire framing.
pub fn audio_envelope(base64_audio: &str) -> String {
    json!({ "audio": base64_audio }).to_string()
}
