//! AceStream middleware client.
//!
//! The middleware is an external HTTP service with two operations the
//! proxy cares about: *open* (resolve a content key into a one-shot
//! playback URL plus a command URL) and *stop* (release engine
//! resources). [`UpstreamClient`] abstracts both, together with the
//! playback byte stream itself, so tests can substitute a deterministic
//! in-memory upstream.

pub mod client;
pub mod models;

pub use client::{ByteStream, HttpUpstreamClient, UpstreamClient};
pub use models::{ContentKey, KeyKind, StreamDescriptor};

#[cfg(test)]
pub(crate) mod testing;
