//! Error type definitions for the proxy.
//!
//! A hierarchical error system: [`AppError`] at the top, with domain
//! enums below it. Display messages double as the plain-text bodies of
//! error responses, so they are written for humans.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors (bad flags or environment values)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// AceStream middleware errors
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Client request validation errors
    #[error("Bad request: {0}")]
    Request(#[from] RequestError),

    /// Listener or server I/O failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while building the runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Listen address could not be parsed or resolved
    #[error("invalid listen address '{addr}': {message}")]
    InvalidListenAddr { addr: String, message: String },

    /// Scheme other than http/https
    #[error("invalid scheme '{scheme}': expected 'http' or 'https'")]
    InvalidScheme { scheme: String },
}

/// Errors talking to the AceStream middleware or its playback endpoint.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Middleware or playback endpoint answered with a non-success status
    #[error("middleware returned HTTP {status}")]
    Status { status: u16 },

    /// Middleware reported an error in its JSON envelope
    #[error("middleware error: {message}")]
    Middleware { message: String },

    /// Required field absent from the middleware reply
    #[error("middleware reply is missing required field '{field}'")]
    MissingField { field: &'static str },

    /// The no-response timeout elapsed before the middleware answered
    #[error("middleware did not answer within the no-response timeout")]
    Timeout,

    /// Playback connect or initial status did not arrive within the
    /// read-inactivity bound
    #[error("upstream playback did not respond within the empty timeout")]
    PlaybackTimeout,

    /// Transport-level failures
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed command or playback URL in a middleware reply
    #[error("invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Request validation errors, surfaced as HTTP 400 with the display text.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("missing stream identifier: exactly one of 'id' or 'infohash' is required")]
    MissingKey,

    #[error("'id' and 'infohash' are mutually exclusive")]
    ConflictingKeys,

    #[error("duplicate query parameter '{name}'")]
    DuplicateParam { name: &'static str },

    #[error("query parameter '{name}' is reserved for the proxy")]
    ReservedParam { name: &'static str },

    #[error("query parameter '{name}' must not be empty")]
    EmptyKey { name: &'static str },
}
