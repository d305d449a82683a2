//! Runtime configuration for the proxy.
//!
//! All options come from CLI flags with environment-variable fallbacks
//! (`ACEXY_*`); there is no configuration file. The binary builds a
//! [`Config`] once at startup and hands it to the web server, so nothing
//! in the library reads process state.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

pub mod defaults;

use defaults::*;

/// URL scheme used to reach the AceStream middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(ConfigError::InvalidScheme {
                scheme: other.to_string(),
            }),
        }
    }
}

/// Where and how to reach the AceStream middleware.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
}

impl EngineConfig {
    /// Base URL of the middleware stream endpoint for the configured mode.
    pub fn endpoint_url(&self, m3u8: bool) -> String {
        let path = if m3u8 {
            "/ace/manifest.m3u8"
        } else {
            "/ace/getstream"
        };
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, path)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ENGINE_HOST.to_string(),
            port: DEFAULT_ENGINE_PORT,
            scheme: Scheme::Http,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// AceStream middleware endpoint.
    pub engine: EngineConfig,
    /// Address the proxy listens on.
    pub listen_addr: SocketAddr,
    /// Serve HLS manifests instead of raw MPEG-TS.
    pub m3u8: bool,
    /// Reserved for compatibility with the original CLI; the multiplexer
    /// uses a fixed 8 KiB chunk size and does not consult this value.
    pub buffer_size: usize,
    /// Upstream read inactivity treated as normal end of stream (TS mode).
    pub empty_timeout: Duration,
    /// Bound on middleware `open`/`stop` round-trips.
    pub no_response_timeout: Duration,
    /// Upstream read inactivity bound in M3U8 mode, where manifest bodies
    /// arrive periodically rather than continuously.
    pub m3u8_stream_timeout: Duration,
}

impl Config {
    /// Read-inactivity bound for the active streaming mode.
    pub fn read_timeout(&self) -> Duration {
        if self.m3u8 {
            self.m3u8_stream_timeout
        } else {
            self.empty_timeout
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            listen_addr: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                DEFAULT_LISTEN_PORT,
            ),
            m3u8: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            empty_timeout: Duration::from_secs(DEFAULT_EMPTY_TIMEOUT_SECS),
            no_response_timeout: Duration::from_secs(DEFAULT_NO_RESPONSE_TIMEOUT_SECS),
            m3u8_stream_timeout: Duration::from_secs(DEFAULT_M3U8_STREAM_TIMEOUT_SECS),
        }
    }
}

/// Parse a `[host]:port` listen address.
///
/// Accepts `:port` (all interfaces), IPv4/IPv6 literals (the latter
/// bracketed, e.g. `[::1]:8080`), and resolvable hostnames. IPv6 literals
/// contain colons themselves, so this goes through the standard socket
/// address parser instead of splitting on `:`.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidListenAddr {
        addr: addr.to_string(),
        message: message.to_string(),
    };

    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    if let Ok(parsed) = addr.parse::<SocketAddr>() {
        return Ok(parsed);
    }

    // Hostname:port, resolved at startup.
    addr.to_socket_addrs()
        .map_err(|e| invalid(&e.to_string()))?
        .next()
        .ok_or_else(|| invalid("hostname did not resolve to any address"))
}
