//! HTTP request handlers.
//!
//! `getstream` turns a validated request into an attach on the session
//! registry and returns a streaming response fed by the producer.
//! Response headers are committed when the handler returns, after the
//! attach, so an attach failure still surfaces as a real 500. The body
//! channel exists before the subscriber joins the set, so the producer
//! never writes into an unprepared response.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, RawQuery, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::errors::RequestError;
use crate::streaming::sink::{ChannelSink, SubscriberBody};
use crate::upstream::{ContentKey, KeyKind};
use crate::web::AppState;

/// Response content types per mode.
const CONTENT_TYPE_MPEGTS: &str = "video/MP2T";
const CONTENT_TYPE_M3U8: &str = "application/x-mpegURL";

/// Readiness bounds for the handler that started the producer.
const STARTED_WAIT: Duration = Duration::from_secs(10);
const FIRST_CHUNK_WAIT: Duration = Duration::from_secs(5);

/// Chunks buffered per subscriber before writes exert backpressure.
const SINK_CAPACITY: usize = 64;

/// A validated stream request: the content key plus every other query
/// parameter, forwarded verbatim to the middleware.
#[derive(Debug)]
pub(crate) struct StreamRequest {
    pub key: ContentKey,
    pub extra_params: Vec<(String, String)>,
}

/// Validate the raw query string of a stream request.
///
/// Exactly one of `id`/`infohash` must be present, neither duplicated;
/// `pid` is reserved for the proxy. Everything else is forwarded.
pub(crate) fn parse_stream_request(raw: Option<&str>) -> Result<StreamRequest, RequestError> {
    let mut id: Option<String> = None;
    let mut infohash: Option<String> = None;
    let mut extra_params = Vec::new();

    if let Some(raw) = raw {
        for (name, value) in url::form_urlencoded::parse(raw.as_bytes()).into_owned() {
            if name == "pid" {
                return Err(RequestError::ReservedParam { name: "pid" });
            } else if name == "id" {
                if id.replace(value).is_some() {
                    return Err(RequestError::DuplicateParam { name: "id" });
                }
            } else if name == "infohash" {
                if infohash.replace(value).is_some() {
                    return Err(RequestError::DuplicateParam { name: "infohash" });
                }
            } else {
                extra_params.push((name, value));
            }
        }
    }

    let key = match (id, infohash) {
        (Some(_), Some(_)) => return Err(RequestError::ConflictingKeys),
        (Some(value), None) => ContentKey::new(KeyKind::Id, value)?,
        (None, Some(value)) => ContentKey::new(KeyKind::Infohash, value)?,
        (None, None) => return Err(RequestError::MissingKey),
    };

    Ok(StreamRequest { key, extra_params })
}

/// `GET /ace/getstream` (and `/ace/manifest.m3u8` in M3U8 mode): attach
/// to the fan-out session for the requested content key.
pub async fn getstream(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let request = match parse_stream_request(query.as_deref()) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejected stream request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    info!(stream_id = %request.key.value(), "stream requested");

    // Prepare the downstream channel before attaching, so the producer
    // always has somewhere to write.
    let (sink, body_rx) = ChannelSink::channel(SINK_CAPACITY);

    let outcome = match state
        .registry
        .attach(request.key, &request.extra_params, Arc::new(sink))
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "failed to open upstream session");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to open upstream session: {e}"),
            )
                .into_response();
        }
    };

    // The handler that created the session gates on readiness: upstream
    // connected, then first byte flowing. Joiners ride an already-proven
    // session.
    if outcome.started_producer {
        if !outcome.session.started().wait_timeout(STARTED_WAIT).await {
            outcome.session.detach(outcome.subscriber).await;
            return (
                StatusCode::GATEWAY_TIMEOUT,
                "upstream session did not start in time",
            )
                .into_response();
        }
        if !outcome
            .session
            .first_chunk()
            .wait_timeout(FIRST_CHUNK_WAIT)
            .await
        {
            outcome.session.detach(outcome.subscriber).await;
            return (
                StatusCode::GATEWAY_TIMEOUT,
                "upstream session produced no data in time",
            )
                .into_response();
        }
    }

    let content_type = if state.config.m3u8 {
        CONTENT_TYPE_M3U8
    } else {
        CONTENT_TYPE_MPEGTS
    };
    let body = SubscriberBody::new(body_rx, outcome.session.clone(), outcome.subscriber);

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
    {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "failed to build stream response");
            outcome.session.detach(outcome.subscriber).await;
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response()
        }
    }
}

/// Query parameters accepted by `/ace/status`.
#[derive(Debug, Deserialize)]
pub struct StatusParams {
    id: Option<String>,
    infohash: Option<String>,
}

/// Registry-wide summary.
#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub streams: usize,
}

/// Per-stream status.
#[derive(Debug, Serialize)]
pub struct StreamStatus {
    pub clients: usize,
    pub stream_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat_url: Option<String>,
}

/// `GET /ace/status`: registry size, or detail for one content key.
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Response {
    let key = params.id.or(params.infohash);
    match key {
        None => {
            let summary = StatusSummary {
                streams: state.registry.stream_count().await,
            };
            axum::Json(summary).into_response()
        }
        Some(key) => match state.registry.get(&key).await {
            Some(session) => {
                let detail = StreamStatus {
                    clients: session.subscriber_count().await,
                    stream_id: key,
                    stat_url: session.descriptor().stat_url.clone(),
                };
                axum::Json(detail).into_response()
            }
            None => (StatusCode::NOT_FOUND, "no such stream").into_response(),
        },
    }
}
