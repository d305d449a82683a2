//! HTTP implementation of the middleware client.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::UpstreamError;
use crate::upstream::models::{CommandReply, MiddlewareReply};
use crate::upstream::{ContentKey, StreamDescriptor};

/// Chunked upstream playback body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

/// Capability set of the AceStream middleware as the proxy uses it.
///
/// `open` and `stop` map onto the middleware control surface; `playback`
/// opens the one-shot stream URL an *open* produced. Keeping playback on
/// the same trait lets tests drive the producer loop with an in-memory
/// byte source.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Resolve a content key into a playback descriptor.
    async fn open(
        &self,
        key: &ContentKey,
        extra_params: &[(String, String)],
    ) -> Result<StreamDescriptor, UpstreamError>;

    /// Open the playback URL and return its chunked body.
    async fn playback(&self, descriptor: &StreamDescriptor) -> Result<ByteStream, UpstreamError>;

    /// Ask the engine to release the session. Callers treat failures as
    /// log-and-continue; a failed stop never fails a teardown.
    async fn stop(&self, descriptor: &StreamDescriptor) -> Result<(), UpstreamError>;
}

/// [`UpstreamClient`] over the process-wide `reqwest` pool.
pub struct HttpUpstreamClient {
    http: reqwest::Client,
    endpoint: Url,
    no_response_timeout: Duration,
}

impl HttpUpstreamClient {
    pub fn new(http: reqwest::Client, config: &Config) -> Result<Self, UpstreamError> {
        let endpoint = Url::parse(&config.engine.endpoint_url(config.m3u8))?;
        Ok(Self {
            http,
            endpoint,
            no_response_timeout: config.no_response_timeout,
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn open(
        &self,
        key: &ContentKey,
        extra_params: &[(String, String)],
    ) -> Result<StreamDescriptor, UpstreamError> {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("format", "json");
            pairs.append_pair("pid", &Uuid::new_v4().to_string());
            pairs.append_pair(key.kind().query_param(), key.value());
            for (name, value) in extra_params {
                pairs.append_pair(name, value);
            }
        }

        debug!(stream_id = %key.value(), url = %url, "opening upstream session");

        let response = self
            .http
            .get(url)
            .timeout(self.no_response_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Http(e)
                }
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        let reply: MiddlewareReply = response.json().await?;
        if let Some(message) = reply.error.filter(|m| !m.is_empty()) {
            return Err(UpstreamError::Middleware { message });
        }
        let body = reply
            .response
            .ok_or(UpstreamError::MissingField { field: "response" })?;
        let playback_url = body.playback_url.ok_or(UpstreamError::MissingField {
            field: "response.playback_url",
        })?;
        let command_url = body.command_url.ok_or(UpstreamError::MissingField {
            field: "response.command_url",
        })?;

        Ok(StreamDescriptor {
            key: key.clone(),
            playback_url,
            command_url,
            stat_url: body.stat_url,
        })
    }

    async fn playback(&self, descriptor: &StreamDescriptor) -> Result<ByteStream, UpstreamError> {
        // No total timeout: live streams stay open indefinitely. Read
        // inactivity is the producer's policy, not the transport's.
        let response = self.http.get(&descriptor.playback_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(UpstreamError::Http)),
        ))
    }

    async fn stop(&self, descriptor: &StreamDescriptor) -> Result<(), UpstreamError> {
        let mut url = Url::parse(&descriptor.command_url)?;
        url.query_pairs_mut().append_pair("method", "stop");

        debug!(stream_id = %descriptor.key.value(), "dispatching stop to middleware");

        let response = self
            .http
            .get(url)
            .timeout(self.no_response_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }
        let reply: CommandReply = response.json().await?;
        if let Some(message) = reply.error.filter(|m| !m.is_empty()) {
            return Err(UpstreamError::Middleware { message });
        }
        Ok(())
    }
}
