//! Error handling module
//!
//! Re-exports the error types used throughout the proxy.

pub mod types;

pub use types::{AppError, ConfigError, RequestError, UpstreamError};
