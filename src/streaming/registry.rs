//! Process-wide content-key → session registry.
//!
//! The registry enforces at-most-one live session per key. The middleware
//! `open` is awaited while the registry lock is held: that serializes
//! dedup decisions (no two handlers can race an open for the same key, or
//! for different keys) at the cost of one in-flight open per process.
//! The middleware answers within the no-response timeout, so the critical
//! section is bounded.
//!
//! Lock order is registry before session, everywhere.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::UpstreamError;
use crate::streaming::producer;
use crate::streaming::session::StreamSession;
use crate::streaming::sink::StreamSink;
use crate::upstream::{ContentKey, UpstreamClient};

/// Result of attaching a subscriber to a (possibly new) session.
pub struct AttachOutcome {
    pub session: Arc<StreamSession>,
    pub subscriber: Uuid,
    /// Whether this attach created the session and spawned its producer.
    pub started_producer: bool,
}

/// Shared handle onto the session map. Cheap to clone; the web layer and
/// every producer task hold one.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    pub(crate) sessions: Mutex<HashMap<String, Arc<StreamSession>>>,
    pub(crate) upstream: Arc<dyn UpstreamClient>,
    /// Upstream read-inactivity bound handed to every producer.
    pub(crate) read_timeout: Duration,
}

impl RegistryInner {
    /// Remove the entry for `key` iff it still maps to `session`. A newer
    /// session under the same key is left untouched.
    pub(crate) async fn remove_if(&self, key: &str, session: &Arc<StreamSession>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(current) = sessions.get(key) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(key);
            }
        }
    }
}

impl SessionRegistry {
    pub fn new(upstream: Arc<dyn UpstreamClient>, read_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                upstream,
                read_timeout,
            }),
        }
    }

    /// Attach a subscriber to the session for `key`, opening the upstream
    /// and spawning a producer if no live session exists.
    pub async fn attach(
        &self,
        key: ContentKey,
        extra_params: &[(String, String)],
        sink: Arc<dyn StreamSink>,
    ) -> Result<AttachOutcome, UpstreamError> {
        let mut sessions = self.inner.sessions.lock().await;

        if let Some(existing) = sessions.get(key.value()) {
            if !existing.is_finished() {
                let session = existing.clone();
                let subscriber = session.attach(sink).await;
                debug!(stream_id = %key.value(), "joined existing session");
                return Ok(AttachOutcome {
                    session,
                    subscriber,
                    started_producer: false,
                });
            }
        }

        let descriptor = self.inner.upstream.open(&key, extra_params).await?;
        let session = Arc::new(StreamSession::new(descriptor));
        sessions.insert(key.value().to_string(), session.clone());
        let subscriber = session.attach(sink).await;

        let handle = tokio::spawn(producer::run(self.inner.clone(), session.clone()));
        session.set_producer_handle(handle);
        info!(stream_id = %key.value(), "opened upstream session");

        Ok(AttachOutcome {
            session,
            subscriber,
            started_producer: true,
        })
    }

    /// Number of live sessions.
    pub async fn stream_count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// Session for a key value, if one is registered.
    pub async fn get(&self, key: &str) -> Option<Arc<StreamSession>> {
        self.inner.sessions.lock().await.get(key).cloned()
    }

    /// Cancel every producer and wait for each teardown to complete.
    /// Used on process shutdown, before the outbound client drops.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<StreamSession>> = {
            let sessions = self.inner.sessions.lock().await;
            sessions.values().cloned().collect()
        };
        if sessions.is_empty() {
            return;
        }
        info!(streams = sessions.len(), "shutting down active sessions");
        for session in &sessions {
            session.cancel();
        }
        for session in &sessions {
            session.done().wait().await;
            session.join_producer().await;
        }
    }
}
