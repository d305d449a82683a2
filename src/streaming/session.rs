//! Per-key streaming session state.
//!
//! A [`StreamSession`] owns the upstream descriptor, the subscriber set
//! and the readiness signals for one content key. The subscriber set is
//! only ever touched under the session lock; the producer loop drives
//! [`broadcast`](StreamSession::broadcast) and
//! [`evict_stale`](StreamSession::evict_stale) from a single task.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::streaming::latch::Latch;
use crate::streaming::sink::StreamSink;
use crate::upstream::{ContentKey, StreamDescriptor};

/// One attached downstream client.
pub struct Subscriber {
    pub sink: Arc<dyn StreamSink>,
    /// Monotonic time of the most recent successful write.
    pub last_write: Instant,
}

/// Result of one fan-out iteration.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastOutcome {
    /// At least one subscriber accepted the chunk.
    pub delivered: bool,
    /// Subscribers remaining after evictions.
    pub remaining: usize,
}

/// The per-key session: upstream descriptor, subscriber set, readiness
/// signals and the producer task handle.
pub struct StreamSession {
    descriptor: StreamDescriptor,
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
    started: Latch,
    first_chunk: Latch,
    done: Latch,
    cancel: CancellationToken,
    producer: StdMutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
    pub fn new(descriptor: StreamDescriptor) -> Self {
        Self {
            descriptor,
            subscribers: Mutex::new(HashMap::new()),
            started: Latch::new(),
            first_chunk: Latch::new(),
            done: Latch::new(),
            cancel: CancellationToken::new(),
            producer: StdMutex::new(None),
        }
    }

    pub fn key(&self) -> &ContentKey {
        &self.descriptor.key
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Set once the producer has connected upstream, or has terminated
    /// trying, so waiters never hang on a session that will not start.
    pub fn started(&self) -> &Latch {
        &self.started
    }

    /// Set once at least one upstream byte reached a subscriber.
    pub fn first_chunk(&self) -> &Latch {
        &self.first_chunk
    }

    /// Set after teardown: subscribers drained, stop dispatched, registry
    /// entry removed.
    pub fn done(&self) -> &Latch {
        &self.done
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_set()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request producer termination; teardown still runs.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn set_producer_handle(&self, handle: JoinHandle<()>) {
        *self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Reap the producer task after `done` has fired.
    pub(crate) async fn join_producer(&self) {
        let handle = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Add a subscriber; returns its id.
    pub async fn attach(&self, sink: Arc<dyn StreamSink>) -> Uuid {
        let id = Uuid::new_v4();
        let mut subscribers = self.subscribers.lock().await;
        subscribers.insert(
            id,
            Subscriber {
                sink,
                last_write: Instant::now(),
            },
        );
        debug!(
            stream_id = %self.key().value(),
            subscriber = %id,
            total = subscribers.len(),
            "subscriber attached"
        );
        id
    }

    /// Remove a subscriber. Idempotent; returns whether it was present.
    pub async fn detach(&self, id: Uuid) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            debug!(
                stream_id = %self.key().value(),
                subscriber = %id,
                total = subscribers.len(),
                "subscriber detached"
            );
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Write one chunk to every subscriber, evicting the dead.
    ///
    /// Writes are awaited so slow consumers exert backpressure, but each
    /// write is bounded by `write_stall`: a peer that accepts nothing for
    /// that long is by definition stale and is evicted on the spot.
    pub async fn broadcast(&self, chunk: Bytes, write_stall: Duration) -> BroadcastOutcome {
        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = false;
        let mut dead = Vec::new();

        for (id, subscriber) in subscribers.iter_mut() {
            match tokio::time::timeout(write_stall, subscriber.sink.write(chunk.clone())).await {
                Ok(Ok(())) => {
                    subscriber.last_write = Instant::now();
                    delivered = true;
                }
                Ok(Err(_)) => {
                    debug!(
                        stream_id = %self.key().value(),
                        subscriber = %id,
                        "subscriber disconnected during write"
                    );
                    dead.push(*id);
                }
                Err(_) => {
                    warn!(
                        stream_id = %self.key().value(),
                        subscriber = %id,
                        "subscriber write stalled past the stale bound"
                    );
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            if let Some(subscriber) = subscribers.remove(&id) {
                subscriber.sink.close();
            }
        }

        BroadcastOutcome {
            delivered,
            remaining: subscribers.len(),
        }
    }

    /// Evict every subscriber without a successful write for `threshold`.
    /// Returns how many were removed.
    pub async fn evict_stale(&self, threshold: Duration) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let before = subscribers.len();
        subscribers.retain(|id, subscriber| {
            let stale = subscriber.last_write.elapsed() >= threshold;
            if stale {
                warn!(
                    stream_id = %self.key().value(),
                    subscriber = %id,
                    "evicting stale subscriber"
                );
                subscriber.sink.close();
            }
            !stale
        });
        before - subscribers.len()
    }

    /// Take the whole subscriber set; used by teardown.
    pub(crate) async fn drain_subscribers(&self) -> Vec<(Uuid, Subscriber)> {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.drain().collect()
    }
}
