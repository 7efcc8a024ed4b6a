use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    network: Network,
    audio: Audio,
    transport: Transport,
    connection: Connection,
    session: Session,
}

#[derive(Deserialize)]
struct Network {
    api_base_url: String,
    ws_url: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    sample_rate: u32,
    channels: u16,
    chunk_duration_ms: u64,
}

#[derive(Deserialize)]
struct Transport {
    wire_framing: String,
    mode: String,
    fragment_size: usize,
}

#[derive(Deserialize)]
struct Connection {
    connect_timeout_ms: u64,
    send_timeout_ms: u64,
    reconnect_base_delay_ms: u64,
    max_reconnect_attempts: u32,
}

#[derive(Deserialize)]
struct Session {
    chunk_retry_delay_ms: u64,
    settle_delay_ms: u64,
    status_interval_ms: u64,
}

// 在编译时读取 config.toml，作为运行时环境变量的默认值
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 网络配置
    println!("cargo:rustc-env=DEFAULT_API_BASE_URL={}", config.network.api_base_url);
    println!("cargo:rustc-env=DEFAULT_WS_URL={}", config.network.ws_url);

    // 音频配置
    println!("cargo:rustc-env=DEFAULT_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=DEFAULT_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=DEFAULT_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=DEFAULT_CHUNK_DURATION={}", config.audio.chunk_duration_ms);

    // 传输配置
    println!("cargo:rustc-env=DEFAULT_WIRE_FRAMING={}", config.transport.wire_framing);
    println!("cargo:rustc-env=DEFAULT_TRANSPORT_MODE={}", config.transport.mode);
    println!("cargo:rustc-env=DEFAULT_FRAGMENT_SIZE={}", config.transport.fragment_size);

    // 连接配置
    println!("cargo:rustc-env=DEFAULT_CONNECT_TIMEOUT={}", config.connection.connect_timeout_ms);
    println!("cargo:rustc-env=DEFAULT_SEND_TIMEOUT={}", config.connection.send_timeout_ms);
    println!("cargo:rustc-env=DEFAULT_RECONNECT_BASE_DELAY={}", config.connection.reconnect_base_delay_ms);
    println!("cargo:rustc-env=DEFAULT_MAX_RECONNECT_ATTEMPTS={}", config.connection.max_reconnect_attempts);

    // 会话配置
    println!("cargo:rustc-env=DEFAULT_CHUNK_RETRY_DELAY={}", config.session.chunk_retry_delay_ms);
    println!("cargo:rustc-env=DEFAULT_SETTLE_DELAY={}", config.session.settle_delay_ms);
    println!("cargo:rustc-env=DEFAULT_STATUS_INTERVAL={}", config.session.status_interval_ms);
}
