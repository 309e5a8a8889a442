//! Single-read body helpers.
//!
//! # Responsibilities
//! - Buffer a bounded prefix of a body without losing the rest
//! - Reassemble the original stream from prefix + unread remainder
//! - Drain response bodies before a connection is reused
//! - Keep a known body length on the wire after reassembly
//!
//! # Design Decisions
//! - Buffer once, then replace: the reassembled body is handed on in place of
//!   the original, so every later reader sees the complete stream
//! - Read errors are replayed in-stream instead of being swallowed

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream};
use futures_util::{future, StreamExt};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderValue};
use hyper::body::Body as HttpBody;

/// Upper bound on bytes discarded when draining a response.
pub const DRAIN_LIMIT: usize = 1 << 20;

/// Unread remainder of a body.
pub type Rest = BoxStream<'static, Result<Bytes, axum::Error>>;

/// Whether the body is known to carry no data.
pub fn is_empty(body: &Body) -> bool {
    body.is_end_stream()
}

/// Exact body length, when the body knows it.
pub fn exact_len(body: &Body) -> Option<u64> {
    body.size_hint().exact()
}

/// Set `content-length` to `len` unless the header is already present.
///
/// A reassembled body is a stream and would otherwise go out chunked.
pub fn keep_length(headers: &mut HeaderMap, len: Option<u64>) {
    if let Some(len) = len {
        if !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
    }
}

/// A buffered body prefix plus whatever was left unread.
pub struct Prefix {
    bytes: Bytes,
    rest: Option<Rest>,
    error: Option<axum::Error>,
}

impl Prefix {
    /// Bytes buffered so far.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The whole body was read without error.
    pub fn is_complete(&self) -> bool {
        self.rest.is_none() && self.error.is_none()
    }

    /// Error hit while reading the prefix, if any.
    pub fn error(&self) -> Option<&axum::Error> {
        self.error.as_ref()
    }

    /// Split into the buffered bytes and the unread remainder.
    pub fn into_parts(self) -> (Bytes, Option<Rest>, Option<axum::Error>) {
        (self.bytes, self.rest, self.error)
    }

    /// Rebuild a body equivalent to the one the prefix was read from.
    pub fn into_body(self) -> Body {
        if self.is_complete() {
            return Body::from(self.bytes);
        }

        let mut head: Vec<Result<Bytes, axum::Error>> = Vec::with_capacity(2);
        if !self.bytes.is_empty() {
            head.push(Ok(self.bytes));
        }
        if let Some(e) = self.error {
            head.push(Err(e));
        }

        let rest = stream::iter(self.rest).flatten();
        Body::from_stream(stream::iter(head).chain(rest))
    }
}

/// Read from `body` until `limit` bytes are buffered or it ends.
///
/// A chunk crossing the limit is split; its tail leads the unread rest.
pub async fn read_prefix(body: Body, limit: usize) -> Prefix {
    let mut data = body.into_data_stream();
    let mut buf = BytesMut::new();

    while buf.len() < limit {
        match data.next().await {
            Some(Ok(chunk)) => {
                let room = limit - buf.len();
                if chunk.len() > room {
                    buf.extend_from_slice(&chunk[..room]);
                    let tail = stream::once(future::ready(Ok(chunk.slice(room..))));
                    return Prefix {
                        bytes: buf.freeze(),
                        rest: Some(tail.chain(data).boxed()),
                        error: None,
                    };
                }
                buf.extend_from_slice(&chunk);
            }
            Some(Err(e)) => {
                return Prefix {
                    bytes: buf.freeze(),
                    rest: None,
                    error: Some(e),
                };
            }
            None => {
                return Prefix {
                    bytes: buf.freeze(),
                    rest: None,
                    error: None,
                };
            }
        }
    }

    Prefix {
        bytes: buf.freeze(),
        rest: Some(data.boxed()),
        error: None,
    }
}

/// A bounded sample of a body and the restored body to pass on.
pub struct Sample {
    pub bytes: Bytes,
    pub body: Body,
    /// Read error encountered while sampling; it is also replayed in `body`.
    pub error: Option<String>,
}

/// Take up to `cap` bytes from the front of `body` and restore it.
pub async fn sample(body: Body, cap: usize) -> Sample {
    if cap == 0 || is_empty(&body) {
        return Sample {
            bytes: Bytes::new(),
            body,
            error: None,
        };
    }

    let prefix = read_prefix(body, cap).await;
    let bytes = prefix.bytes().slice(..prefix.len().min(cap));
    let error = prefix.error().map(|e| e.to_string());

    Sample {
        bytes,
        body: prefix.into_body(),
        error,
    }
}

/// Read and discard up to `limit` bytes so the connection can be reused.
pub async fn drain(body: Body, limit: usize) {
    let mut data = body.into_data_stream();
    let mut seen = 0usize;

    while seen < limit {
        match data.next().await {
            Some(Ok(chunk)) => seen += chunk.len(),
            Some(Err(e)) => {
                tracing::debug!(error = %e, drained = seen, "Failed to drain body");
                break;
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(parts: &[&'static str]) -> Body {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
        Body::from_stream(stream::iter(chunks))
    }

    async fn collect(body: Body) -> Bytes {
        axum::body::to_bytes(body, usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn test_prefix_of_short_body_is_complete() {
        let prefix = read_prefix(Body::from("hello"), 64).await;
        assert!(prefix.is_complete());
        assert_eq!(prefix.bytes(), &Bytes::from_static(b"hello"));
        assert_eq!(collect(prefix.into_body()).await, "hello");
    }

    #[tokio::test]
    async fn test_prefix_keeps_unread_rest() {
        let prefix = read_prefix(chunked(&["ab", "cd", "ef", "gh"]), 3).await;
        assert!(!prefix.is_complete());
        assert_eq!(prefix.bytes(), &Bytes::from_static(b"abc"));
        assert_eq!(collect(prefix.into_body()).await, "abcdefgh");
    }

    #[tokio::test]
    async fn test_prefix_splits_oversized_chunk() {
        let prefix = read_prefix(Body::from("0123456789"), 4).await;
        assert_eq!(prefix.len(), 4);
        assert!(!prefix.is_complete());

        let (head, rest, _) = prefix.into_parts();
        assert_eq!(head, "0123");
        let rest: Vec<Bytes> = rest.unwrap().map(|c| c.unwrap()).collect().await;
        assert_eq!(rest.concat(), b"456789");
    }

    #[tokio::test]
    async fn test_prefix_at_chunk_boundary_is_not_split() {
        let prefix = read_prefix(chunked(&["ab", "cd"]), 2).await;
        assert_eq!(prefix.bytes(), &Bytes::from_static(b"ab"));
        assert_eq!(collect(prefix.into_body()).await, "abcd");
    }

    #[test]
    fn test_keep_length() {
        let mut headers = HeaderMap::new();
        keep_length(&mut headers, exact_len(&Body::from("0123456789")));
        assert_eq!(headers[CONTENT_LENGTH], "10");

        keep_length(&mut headers, Some(99));
        assert_eq!(headers[CONTENT_LENGTH], "10");

        let mut headers = HeaderMap::new();
        keep_length(&mut headers, exact_len(&chunked(&["ab"])));
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn test_drain_stops_on_error() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Err(std::io::Error::other("reset")),
            Ok(Bytes::from_static(b"cd")),
        ];
        drain(Body::from_stream(stream::iter(chunks)), DRAIN_LIMIT).await;
    }

    #[tokio::test]
    async fn test_prefix_replays_read_error() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom")),
        ];
        let prefix = read_prefix(Body::from_stream(stream::iter(chunks)), 64).await;
        assert!(prefix.error().is_some());
        assert_eq!(prefix.len(), 2);

        let res = axum::body::to_bytes(prefix.into_body(), usize::MAX).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_sample_is_bounded_and_body_restored() {
        let s = sample(chunked(&["0123", "4567", "89"]), 6).await;
        assert_eq!(s.bytes, "012345");
        assert!(s.error.is_none());
        assert_eq!(collect(s.body).await, "0123456789");
    }

    #[tokio::test]
    async fn test_sample_with_zero_cap_leaves_body_alone() {
        let s = sample(Body::from("abc"), 0).await;
        assert!(s.bytes.is_empty());
        assert_eq!(collect(s.body).await, "abc");
    }

    #[test]
    fn test_empty_body_detection() {
        assert!(is_empty(&Body::empty()));
        assert!(!is_empty(&Body::from("x")));
    }
}
