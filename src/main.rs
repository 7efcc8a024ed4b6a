use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;

use callguard::audio::{AlsaCaptureDevice, CaptureSettings};
use callguard::fallback::AnalyzeClient;
use callguard::net_link::WsConnector;
use callguard::error::SessionError;
use callguard::sink::LogSink;
use callguard::wav::{self, WavFormat};
use callguard::{
    AnalysisResult, AnalysisSink, AnalysisSummary, Config, Phase, StreamingOrchestrator,
};

#[derive(Parser)]
#[command(name = "callguard")]
#[command(about = "Stream live call audio to a scam analyzer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream from the capture device until Ctrl+C (default)
    Stream,
    /// Upload one recording to the HTTP analyze endpoint
    Analyze {
        /// WAV file, or raw 16-bit PCM at the configured rate
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    let cli = Cli::parse();

    // 加载配置
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Stream) {
        Commands::Stream => stream(config).await,
        Commands::Analyze { file } => analyze(config, file).await,
    }
}

/// Logs like `LogSink` and keeps every result, so the summary survives a
/// session that the connection ended on its own.
#[derive(Default)]
struct CollectingSink {
    results: Mutex<Vec<AnalysisResult>>,
}

impl CollectingSink {
    fn take(&self) -> Vec<AnalysisResult> {
        match self.results.lock() {
            Ok(mut results) => std::mem::take(&mut *results),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl AnalysisSink for CollectingSink {
    fn on_result(&self, result: &AnalysisResult) {
        LogSink.on_result(result);
        if let Ok(mut results) = self.results.lock() {
            results.push(result.clone());
        }
    }

    fn on_error(&self, error: &SessionError) {
        LogSink.on_error(error);
    }
}

async fn stream(config: Config) -> anyhow::Result<()> {
    let device = AlsaCaptureDevice::new(CaptureSettings::from_config(&config));
    let sink = Arc::new(CollectingSink::default());
    let orchestrator = StreamingOrchestrator::spawn(
        config,
        Box::new(device),
        Arc::new(WsConnector),
        sink.clone(),
    );

    orchestrator.start().await?;
    log::info!("Streaming, press Ctrl+C to stop");

    // 会话可能因重连耗尽而自行结束
    let mut phase = orchestrator.subscribe();
    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            log::info!("Ctrl+C received, stopping...");
        }
        _ = phase.wait_for(|p| *p == Phase::Idle) => {
            log::warn!("Session ended by the connection");
        }
    }

    orchestrator.stop().await?;

    let summary = AnalysisSummary::from_history(&sink.take());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn analyze(config: Config, file: PathBuf) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let wav = if wav::is_wav(&bytes) {
        bytes
    } else {
        wav::wrap_pcm(WavFormat::new(config.sample_rate, config.channels), &bytes)
    };

    let client = AnalyzeClient::from_config(&config)?;
    let result = client.analyze_wav(wav).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
