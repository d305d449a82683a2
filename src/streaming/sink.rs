//! Downstream write surface.
//!
//! A subscriber's HTTP response is fed through a bounded channel: the
//! producer writes into [`ChannelSink`], and [`SubscriberBody`] adapts
//! the receiving half into an axum body. Awaited sends give natural
//! backpressure; a closed channel (client gone) surfaces as a write
//! error, which is the producer's eviction signal.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::streaming::session::StreamSession;

/// Error from a downstream write.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// The downstream consumer is gone (disconnect, cancelled response).
    #[error("subscriber disconnected")]
    Closed,
}

/// One downstream byte sink: accepts chunks, can be closed.
#[async_trait]
pub trait StreamSink: Send + Sync {
    /// Deliver one chunk, awaiting until the consumer has room for it.
    async fn write(&self, chunk: Bytes) -> Result<(), SinkError>;

    /// End the downstream body. Idempotent, best-effort.
    fn close(&self);
}

/// [`StreamSink`] over a bounded mpsc channel.
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl ChannelSink {
    /// Create a sink and the receiver that will become the response body.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StreamSink for ChannelSink {
    async fn write(&self, chunk: Bytes) -> Result<(), SinkError> {
        let tx = self.sender().ok_or(SinkError::Closed)?;
        tx.send(chunk).await.map_err(|_| SinkError::Closed)
    }

    fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Response body that detaches its subscriber from the session when the
/// HTTP framework drops it, so a client disconnect propagates as an
/// eviction rather than a leaked set entry.
pub struct SubscriberBody {
    rx: ReceiverStream<Bytes>,
    _guard: DetachGuard,
}

impl SubscriberBody {
    pub fn new(
        rx: mpsc::Receiver<Bytes>,
        session: std::sync::Arc<StreamSession>,
        subscriber: Uuid,
    ) -> Self {
        Self {
            rx: ReceiverStream::new(rx),
            _guard: DetachGuard {
                session,
                subscriber,
            },
        }
    }
}

impl Stream for SubscriberBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().rx).poll_next(cx).map(|c| c.map(Ok))
    }
}

struct DetachGuard {
    session: std::sync::Arc<StreamSession>,
    subscriber: Uuid,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        let session = self.session.clone();
        let subscriber = self.subscriber;
        tokio::spawn(async move {
            session.detach(subscriber).await;
        });
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_reaches_receiver() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.write(Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn close_ends_the_body() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.write(Bytes::from_static(b"x")).await.unwrap();
        sink.close();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"x"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (sink, _rx) = ChannelSink::channel(4);
        sink.close();
        assert!(sink.write(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn write_after_receiver_dropped_fails() {
        let (sink, rx) = ChannelSink::channel(4);
        drop(rx);
        assert!(sink.write(Bytes::from_static(b"x")).await.is_err());
    }
}
