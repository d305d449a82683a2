/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// AceStream middleware defaults
pub const DEFAULT_ENGINE_HOST: &str = "localhost";
pub const DEFAULT_ENGINE_PORT: u16 = 6878;
pub const DEFAULT_ENGINE_SCHEME: &str = "http";

// Proxy listener defaults
pub const DEFAULT_LISTEN_ADDR: &str = ":8080";
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

// Streaming defaults
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_EMPTY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_NO_RESPONSE_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_M3U8_STREAM_TIMEOUT_SECS: u64 = 60;
