//! Upstream fetch and fan-out loop.
//!
//! One producer task per session. It connects to the playback URL, reads
//! the body in bounded chunks and writes each chunk to every subscriber
//! under the session lock. Dead or stale subscribers are evicted as a
//! side effect; the loop ends when the upstream does, when the read goes
//! idle past the configured timeout (normal end of stream), or when the
//! subscriber set drains. Teardown always runs: it closes remaining
//! sinks, dispatches *stop* to the middleware, removes the registry entry
//! if it still points at this session, and fires the `done` signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::errors::UpstreamError;
use crate::streaming::registry::RegistryInner;
use crate::streaming::session::StreamSession;

/// Upstream reads are re-chunked to at most this size before fan-out.
const CHUNK_SIZE: usize = 8 * 1024;
/// A subscriber with no successful write for this long is evicted; a
/// single write is bounded by the same figure so one hung socket cannot
/// hold the producer past it.
const STALE_THRESHOLD: Duration = Duration::from_secs(30);
/// Minimum spacing between stale sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

enum EndOfStream {
    /// Upstream closed the body.
    UpstreamEof,
    /// Read inactivity exceeded the empty timeout.
    Idle,
    /// The last subscriber left.
    Drained,
    /// Forced shutdown.
    Cancelled,
}

pub(crate) async fn run(registry: Arc<RegistryInner>, session: Arc<StreamSession>) {
    let stream_id = session.key().value().to_string();
    match pump(&registry, &session).await {
        Ok(EndOfStream::UpstreamEof) => {
            info!(stream_id = %stream_id, "upstream ended the stream")
        }
        Ok(EndOfStream::Idle) => {
            info!(stream_id = %stream_id, "no upstream data within the empty timeout")
        }
        Ok(EndOfStream::Drained) => {
            info!(stream_id = %stream_id, "last subscriber left")
        }
        Ok(EndOfStream::Cancelled) => {
            debug!(stream_id = %stream_id, "producer cancelled")
        }
        Err(e) => warn!(stream_id = %stream_id, error = %e, "upstream stream failed"),
    }
    teardown(&registry, &session).await;
}

async fn pump(
    registry: &Arc<RegistryInner>,
    session: &Arc<StreamSession>,
) -> Result<EndOfStream, UpstreamError> {
    // The connect and initial status are bounded like body reads, so an
    // upstream that never answers cannot wedge the session past the
    // empty timeout. `started` fires on every path out of connection
    // establishment, so handlers never wait the full readiness timeout
    // on a dead session.
    let connect = tokio::select! {
        _ = session.cancel_token().cancelled() => {
            session.started().set();
            return Ok(EndOfStream::Cancelled);
        }
        connect = tokio::time::timeout(
            registry.read_timeout,
            registry.upstream.playback(session.descriptor()),
        ) => connect,
    };
    let mut stream = match connect {
        Ok(Ok(stream)) => {
            session.started().set();
            stream
        }
        Ok(Err(e)) => {
            session.started().set();
            return Err(e);
        }
        Err(_) => {
            session.started().set();
            return Err(UpstreamError::PlaybackTimeout);
        }
    };

    let mut last_sweep = Instant::now();
    loop {
        let read = tokio::select! {
            _ = session.cancel_token().cancelled() => return Ok(EndOfStream::Cancelled),
            read = tokio::time::timeout(registry.read_timeout, stream.next()) => read,
        };
        let mut chunk = match read {
            // Read inactivity is a normal end of stream, not an error.
            Err(_) => return Ok(EndOfStream::Idle),
            Ok(None) => return Ok(EndOfStream::UpstreamEof),
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(chunk))) => chunk,
        };

        while !chunk.is_empty() {
            let piece = chunk.split_to(chunk.len().min(CHUNK_SIZE));

            if last_sweep.elapsed() >= SWEEP_INTERVAL {
                session.evict_stale(STALE_THRESHOLD).await;
                last_sweep = Instant::now();
            }

            let outcome = session.broadcast(piece, STALE_THRESHOLD).await;
            if outcome.delivered {
                session.first_chunk().set();
            }
            if outcome.remaining == 0 {
                return Ok(EndOfStream::Drained);
            }
        }
    }
}

async fn teardown(registry: &Arc<RegistryInner>, session: &Arc<StreamSession>) {
    close_remaining(session).await;

    if let Err(e) = registry.upstream.stop(session.descriptor()).await {
        warn!(
            stream_id = %session.key().value(),
            error = %e,
            "failed to dispatch stop to middleware"
        );
    }

    registry.remove_if(session.key().value(), session).await;
    // A subscriber can slip in between the first drain and the registry
    // removal; once the entry is gone no more can, so close stragglers.
    close_remaining(session).await;
    session.done().set();
    info!(stream_id = %session.key().value(), "session closed");
}

async fn close_remaining(session: &Arc<StreamSession>) {
    for (id, subscriber) in session.drain_subscribers().await {
        debug!(
            stream_id = %session.key().value(),
            subscriber = %id,
            "closing subscriber at teardown"
        );
        subscriber.sink.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::registry::SessionRegistry;
    use crate::streaming::sink::testing::RecordingSink;
    use crate::upstream::testing::MockUpstream;
    use crate::upstream::{ContentKey, KeyKind};
    use bytes::Bytes;

    fn key(value: &str) -> ContentKey {
        ContentKey::new(KeyKind::Id, value.to_string()).unwrap()
    }

    const READ_TIMEOUT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn delivers_upstream_bytes_in_order_and_tears_down() {
        let upstream = MockUpstream::emitting(vec![
            Bytes::from_static(b"HELLO"),
            Bytes::from_static(b"WORLD"),
        ]);
        let registry = SessionRegistry::new(upstream.clone(), READ_TIMEOUT);

        let sink = Arc::new(RecordingSink::new());
        let outcome = registry.attach(key("ABC"), &[], sink.clone()).await.unwrap();

        outcome.session.done().wait().await;

        assert_eq!(sink.bytes(), b"HELLOWORLD");
        assert!(sink.is_closed());
        assert!(outcome.session.started().is_set());
        assert!(outcome.session.first_chunk().is_set());
        assert_eq!(upstream.open_count(), 1);
        assert_eq!(upstream.stop_count(), 1);
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn large_upstream_reads_are_rechunked() {
        let body = vec![0xAB_u8; CHUNK_SIZE * 2 + 100];
        let upstream = MockUpstream::emitting(vec![Bytes::from(body.clone())]);
        let registry = SessionRegistry::new(upstream, READ_TIMEOUT);

        let sink = Arc::new(RecordingSink::new());
        let outcome = registry.attach(key("ABC"), &[], sink.clone()).await.unwrap();
        outcome.session.done().wait().await;

        assert_eq!(sink.bytes(), body);
        assert_eq!(sink.chunk_count(), 3);
    }

    #[tokio::test]
    async fn ends_when_every_subscriber_is_gone() {
        let upstream = MockUpstream::emitting(vec![
            Bytes::from_static(b"one"),
            Bytes::from_static(b"two"),
            Bytes::from_static(b"three"),
        ])
        .paced(Duration::from_millis(20))
        .holding_open();
        let registry = SessionRegistry::new(upstream.clone(), READ_TIMEOUT);

        let a = Arc::new(RecordingSink::new());
        let b = Arc::new(RecordingSink::new());
        let outcome = registry.attach(key("ABC"), &[], a.clone()).await.unwrap();
        registry.attach(key("ABC"), &[], b.clone()).await.unwrap();

        outcome.session.first_chunk().wait().await;
        a.fail_writes();
        b.fail_writes();

        outcome.session.done().wait().await;

        assert_eq!(upstream.stop_count(), 1);
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn idle_upstream_is_a_normal_end() {
        // Holds the stream open without ever producing a byte.
        let upstream = MockUpstream::emitting(vec![]).holding_open();
        let registry = SessionRegistry::new(upstream.clone(), Duration::from_millis(50));

        let sink = Arc::new(RecordingSink::new());
        let outcome = registry.attach(key("ABC"), &[], sink.clone()).await.unwrap();

        outcome.session.done().wait().await;

        assert!(outcome.session.started().is_set());
        assert!(!outcome.session.first_chunk().is_set());
        assert_eq!(upstream.stop_count(), 1);
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn failed_playback_connect_still_reaches_teardown() {
        let upstream = MockUpstream::emitting(vec![]).failing_playback();
        let registry = SessionRegistry::new(upstream.clone(), READ_TIMEOUT);

        let sink = Arc::new(RecordingSink::new());
        let outcome = registry.attach(key("ABC"), &[], sink.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), outcome.session.done().wait())
            .await
            .expect("session never tore down");

        assert!(outcome.session.started().is_set());
        assert!(!outcome.session.first_chunk().is_set());
        assert!(sink.is_closed());
        assert_eq!(upstream.open_count(), 1);
        assert_eq!(upstream.stop_count(), 1);
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn hung_playback_connect_ends_within_the_read_timeout() {
        let upstream = MockUpstream::emitting(vec![]).hanging_playback();
        let registry = SessionRegistry::new(upstream.clone(), Duration::from_millis(50));

        let sink = Arc::new(RecordingSink::new());
        let outcome = registry.attach(key("ABC"), &[], sink.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), outcome.session.done().wait())
            .await
            .expect("session never tore down");

        assert!(outcome.session.started().is_set());
        assert!(!outcome.session.first_chunk().is_set());
        assert!(sink.is_closed());
        assert_eq!(upstream.open_count(), 1);
        assert_eq!(upstream.stop_count(), 1);
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_hung_connect() {
        let upstream = MockUpstream::emitting(vec![]).hanging_playback();
        // Read timeout far beyond the test's patience; cancellation alone
        // must end the session.
        let registry = SessionRegistry::new(upstream.clone(), Duration::from_secs(60));

        let sink = Arc::new(RecordingSink::new());
        let outcome = registry.attach(key("ABC"), &[], sink.clone()).await.unwrap();

        outcome.session.cancel();
        tokio::time::timeout(Duration::from_secs(1), outcome.session.done().wait())
            .await
            .expect("session never tore down");

        assert!(outcome.session.started().is_set());
        assert!(sink.is_closed());
        assert_eq!(upstream.stop_count(), 1);
        assert_eq!(registry.stream_count().await, 0);
    }

    #[tokio::test]
    async fn cancellation_still_runs_teardown() {
        let upstream = MockUpstream::emitting(vec![Bytes::from_static(b"x")])
            .holding_open();
        let registry = SessionRegistry::new(upstream.clone(), READ_TIMEOUT);

        let sink = Arc::new(RecordingSink::new());
        let outcome = registry.attach(key("ABC"), &[], sink.clone()).await.unwrap();
        outcome.session.first_chunk().wait().await;

        outcome.session.cancel();
        outcome.session.done().wait().await;

        assert!(sink.is_closed());
        assert_eq!(upstream.stop_count(), 1);
        assert_eq!(registry.stream_count().await, 0);
    }
}
