//! Deterministic in-memory upstream for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::errors::UpstreamError;
use crate::upstream::{ByteStream, ContentKey, StreamDescriptor, UpstreamClient};

/// An [`UpstreamClient`] that emits a chosen byte sequence with
/// controllable pacing, counting `open`/`stop` calls.
pub(crate) struct MockUpstream {
    pub opens: AtomicUsize,
    pub stops: AtomicUsize,
    chunks: Vec<Bytes>,
    pace: Duration,
    hold_open: bool,
    fail_open: bool,
    fail_playback: bool,
    hang_playback: bool,
}

impl MockUpstream {
    pub fn emitting(chunks: Vec<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            chunks,
            pace: Duration::ZERO,
            hold_open: false,
            fail_open: false,
            fail_playback: false,
            hang_playback: false,
        })
    }

    /// Delay between emitted chunks.
    pub fn paced(mut self: Arc<Self>, pace: Duration) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().pace = pace;
        self
    }

    /// Keep the playback stream open (pending) after the last chunk
    /// instead of signalling end of stream.
    pub fn holding_open(mut self: Arc<Self>) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().hold_open = true;
        self
    }

    /// Make `open` fail with a middleware error.
    pub fn failing_open(mut self: Arc<Self>) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().fail_open = true;
        self
    }

    /// Make the playback connect fail with an upstream status error.
    pub fn failing_playback(mut self: Arc<Self>) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().fail_playback = true;
        self
    }

    /// Make the playback connect hang forever, as an upstream that
    /// accepts the request but never answers would.
    pub fn hanging_playback(mut self: Arc<Self>) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().hang_playback = true;
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn open(
        &self,
        key: &ContentKey,
        _extra_params: &[(String, String)],
    ) -> Result<StreamDescriptor, UpstreamError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(UpstreamError::Middleware {
                message: "cannot start".to_string(),
            });
        }
        Ok(StreamDescriptor {
            key: key.clone(),
            playback_url: format!("mock://playback/{}", key.value()),
            command_url: format!("mock://command/{}", key.value()),
            stat_url: None,
        })
    }

    async fn playback(&self, _descriptor: &StreamDescriptor) -> Result<ByteStream, UpstreamError> {
        if self.hang_playback {
            futures::future::pending::<()>().await;
        }
        if self.fail_playback {
            return Err(UpstreamError::Status { status: 502 });
        }
        let pace = self.pace;
        let chunks: Vec<Result<Bytes, UpstreamError>> =
            self.chunks.clone().into_iter().map(Ok).collect();
        let paced = futures::stream::iter(chunks).then(move |chunk| async move {
            if pace > Duration::ZERO {
                tokio::time::sleep(pace).await;
            }
            chunk
        });
        let stream: ByteStream = if self.hold_open {
            Box::pin(paced.chain(futures::stream::pending()))
        } else {
            Box::pin(paced)
        };
        Ok(stream)
    }

    async fn stop(&self, _descriptor: &StreamDescriptor) -> Result<(), UpstreamError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
