//! Domain types shared between the middleware client and the multiplexer.

use serde::Deserialize;

use crate::errors::RequestError;

/// Which query parameter names a stream at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// AceStream content id (`id=`)
    Id,
    /// Torrent infohash (`infohash=`)
    Infohash,
}

impl KeyKind {
    /// Query parameter name carrying this kind of key.
    pub fn query_param(&self) -> &'static str {
        match self {
            KeyKind::Id => "id",
            KeyKind::Infohash => "infohash",
        }
    }
}

/// Content key naming one media stream for dedup purposes.
///
/// The value is whichever of `id`/`infohash` the client supplied; the two
/// are mutually exclusive at the request boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    kind: KeyKind,
    value: String,
}

impl ContentKey {
    pub fn new(kind: KeyKind, value: String) -> Result<Self, RequestError> {
        if value.is_empty() {
            return Err(RequestError::EmptyKey {
                name: kind.query_param(),
            });
        }
        Ok(Self { kind, value })
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Result of a successful middleware *open*.
///
/// Lives from the *open* that produced it until the matching *stop*
/// completes at session teardown.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub key: ContentKey,
    pub playback_url: String,
    pub command_url: String,
    pub stat_url: Option<String>,
}

/// Wire shape of the middleware JSON envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct MiddlewareReply {
    pub response: Option<MiddlewareResponse>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MiddlewareResponse {
    pub playback_url: Option<String>,
    pub command_url: Option<String>,
    pub stat_url: Option<String>,
}

/// Wire shape of the `method=stop` reply.
#[derive(Debug, Deserialize)]
pub(crate) struct CommandReply {
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_rejects_empty_value() {
        let err = ContentKey::new(KeyKind::Id, String::new()).unwrap_err();
        assert_eq!(err, RequestError::EmptyKey { name: "id" });
        let err = ContentKey::new(KeyKind::Infohash, String::new()).unwrap_err();
        assert_eq!(err, RequestError::EmptyKey { name: "infohash" });
    }

    #[test]
    fn middleware_reply_deserializes() {
        let reply: MiddlewareReply = serde_json::from_str(
            r#"{"response":{"playback_url":"http://e/p","command_url":"http://e/c"},"error":null}"#,
        )
        .unwrap();
        assert!(reply.error.is_none());
        let body = reply.response.unwrap();
        assert_eq!(body.playback_url.as_deref(), Some("http://e/p"));
        assert_eq!(body.command_url.as_deref(), Some("http://e/c"));
        assert!(body.stat_url.is_none());
    }

    #[test]
    fn middleware_reply_with_error() {
        let reply: MiddlewareReply =
            serde_json::from_str(r#"{"error":"cannot start"}"#).unwrap();
        assert_eq!(reply.error.as_deref(), Some("cannot start"));
        assert!(reply.response.is_none());
    }
}
