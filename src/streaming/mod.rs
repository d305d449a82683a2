//! Stream multiplexing subsystem.
//!
//! One upstream playback stream per content key, fanned out to every
//! downstream subscriber of that key:
//!   - `latch`: one-shot readiness barriers (started / first chunk / done).
//!   - `sink`: the downstream write surface and its HTTP body adapter.
//!   - `session`: per-key state (descriptor, subscriber set, signals).
//!   - `registry`: process-wide key → session map enforcing at-most-one
//!     session per key.
//!   - `producer`: the upstream fetch loop, fan-out, stale-subscriber
//!     eviction and teardown protocol.

pub mod latch;
pub mod producer;
pub mod registry;
pub mod session;
pub mod sink;

pub use latch::Latch;
pub use registry::{AttachOutcome, SessionRegistry};
pub use session::StreamSession;
pub use sink::{ChannelSink, StreamSink, SubscriberBody};
