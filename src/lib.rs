//! callguard - live call audio streaming to a scam analyzer
//!
//! Captures audio, cuts it into fixed-duration chunks and streams them over a
//! persistent WebSocket while analysis results flow back to an
//! [`sink::AnalysisSink`].

pub mod audio;
pub mod backoff;
pub mod chunk;
pub mod chunk_transport;
pub mod config;
pub mod error;
pub mod fallback;
pub mod net_link;
pub mod orchestrator;
pub mod protocol;
pub mod sink;
pub mod wav;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::StreamError;
pub use orchestrator::{Phase, StreamingOrchestrator};
pub use protocol::AnalysisResult;
pub use sink::{AnalysisSink, AnalysisSummary};
