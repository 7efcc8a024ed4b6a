//! Caller-side consumers of analysis results.

use serde::Serialize;

use crate::error::SessionError;
use crate::protocol::{AnalysisResult, ErrorNotification};

/// Receives what the analyzer reports during a session.
///
/// Called from the orchestrator's driver task; implementations must not
/// block.
pub trait AnalysisSink: Send + Sync {
    fn on_result(&self, result: &AnalysisResult);
    fn on_error(&self, error: &SessionError);
}

/// Writes every result and error to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AnalysisSink for LogSink {
    fn on_result(&self, result: &AnalysisResult) {
        if result.suspicious() {
            log::warn!(
                "Suspicious activity (confidence {:.2}): {}",
                result.confidence(),
                result.reasons().join("; ")
            );
            for span in result.detected_spans() {
                log::warn!(
                    "  [{:.1}s - {:.1}s] {:?}: {}",
                    span.start_sec,
                    span.end_sec,
                    span.category,
                    span.text
                );
            }
        } else {
            log::info!(
                "No threat detected (confidence {:.2}, sentiment {})",
                result.confidence(),
                result.sentiment()
            );
        }
    }

    fn on_error(&self, error: &SessionError) {
        if error.is_terminal() {
            log::error!("Session ended: {}", error);
        } else {
            log::warn!("Session error: {}", error);
        }
        if let SessionError::Analyzer(ErrorNotification {
            details: Some(details),
            ..
        }) = error
        {
            log::debug!("Analyzer error details: {}", details);
        }
    }
}

/// Aggregate view over a session's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub results: usize,
    pub any_suspicious: bool,
    pub max_confidence: f64,
    /// De-duplicated, in first-seen order.
    pub reasons: Vec<String>,
}

impl AnalysisSummary {
    pub fn from_history(history: &[AnalysisResult]) -> Self {
        let mut summary = Self {
            results: history.len(),
            ..Self::default()
        };
        for result in history {
            summary.any_suspicious |= result.suspicious();
            summary.max_confidence = summary.max_confidence.max(result.confidence());
            for reason in result.reasons() {
                if !summary.reasons.contains(reason) {
                    summary.reasons.push(reason.clone());
                }
            }
        }
        summary
    }
}
