use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use acexy::config::defaults::*;
use acexy::config::{Config, EngineConfig, parse_listen_addr};
use acexy::web::WebServer;

#[derive(Parser)]
#[command(name = "acexy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "AceStream HTTP proxy that multiplexes one upstream stream to many clients")]
#[command(long_about = None)]
struct Cli {
    /// AceStream middleware host
    #[arg(long, env = "ACEXY_HOST", default_value = DEFAULT_ENGINE_HOST)]
    host: String,

    /// AceStream middleware port
    #[arg(long, env = "ACEXY_PORT", default_value_t = DEFAULT_ENGINE_PORT)]
    port: u16,

    /// Address to listen on, as [host]:port
    #[arg(long, env = "ACEXY_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    listen_addr: String,

    /// AceStream middleware scheme (http or https)
    #[arg(long, env = "ACEXY_SCHEME", default_value = DEFAULT_ENGINE_SCHEME)]
    scheme: String,

    /// Buffer size in bytes (reserved; the multiplexer streams in fixed
    /// 8 KiB chunks)
    #[arg(long, env = "ACEXY_BUFFER_SIZE", default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Serve HLS manifests instead of raw MPEG-TS
    #[arg(long, env = "ACEXY_M3U8")]
    m3u8: bool,

    /// Seconds of upstream read inactivity treated as end of stream
    #[arg(long, env = "ACEXY_EMPTY_TIMEOUT", default_value_t = DEFAULT_EMPTY_TIMEOUT_SECS)]
    empty_timeout: u64,

    /// Seconds to wait for middleware open/stop replies
    #[arg(
        long,
        env = "ACEXY_NO_RESPONSE_TIMEOUT",
        default_value_t = DEFAULT_NO_RESPONSE_TIMEOUT_SECS
    )]
    no_response_timeout: u64,

    /// Seconds of upstream read inactivity treated as end of stream in
    /// M3U8 mode
    #[arg(
        long,
        env = "ACEXY_M3U8_STREAM_TIMEOUT",
        default_value_t = DEFAULT_M3U8_STREAM_TIMEOUT_SECS
    )]
    m3u8_stream_timeout: u64,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        Ok(Config {
            engine: EngineConfig {
                host: self.host,
                port: self.port,
                scheme: self.scheme.parse()?,
            },
            listen_addr: parse_listen_addr(&self.listen_addr)?,
            m3u8: self.m3u8,
            buffer_size: self.buffer_size,
            empty_timeout: Duration::from_secs(self.empty_timeout),
            no_response_timeout: Duration::from_secs(self.no_response_timeout),
            m3u8_stream_timeout: Duration::from_secs(self.m3u8_stream_timeout),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "acexy=info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.into_config()?;

    info!("Starting acexy v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "AceStream middleware at {}://{}:{} ({} mode)",
        config.engine.scheme,
        config.engine.host,
        config.engine.port,
        if config.m3u8 { "M3U8" } else { "MPEG-TS" }
    );

    let server = WebServer::new(config)?;
    server.serve().await
}
