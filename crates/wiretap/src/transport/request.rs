//! Request and response heads carried through the transport session.

use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode, Uri};
use std::fmt;
use std::io::Read;

/// A blocking byte source used for request bodies that are not materialized yet.
pub struct BodyStream(Box<dyn Read + Send + Sync>);

impl BodyStream {
    pub fn new(reader: impl Read + Send + Sync + 'static) -> Self {
        Self(Box::new(reader))
    }

    /// Read into `buf`, retrying on `Interrupted`.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.0.read(buf) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    /// Drain the stream with bounded reads of `chunk_size` bytes until a read
    /// yields zero bytes.
    pub fn drain(mut self, chunk_size: usize) -> std::io::Result<Bytes> {
        let mut body = Vec::new();
        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
            let len = self.read_chunk(&mut buf)?;
            if len == 0 {
                break;
            }
            body.extend_from_slice(&buf[..len]);
        }
        Ok(Bytes::from(body))
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyStream(..)")
    }
}

/// Request body: absent, materialized, or a stream still to be read.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(BodyStream),
}

impl RequestBody {
    pub fn is_stream(&self) -> bool {
        matches!(self, RequestBody::Stream(_))
    }

    /// Materialized bytes, if the body is not a stream.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            RequestBody::Empty => Some(Bytes::new()),
            RequestBody::Bytes(bytes) => Some(bytes.clone()),
            RequestBody::Stream(_) => None,
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            RequestBody::Empty
        } else {
            RequestBody::Bytes(bytes)
        }
    }
}

/// An outgoing request as seen by the interception layer.
///
/// The `handled` marker travels with the request in-process only; it is never
/// written to the wire. A request carrying it is not intercepted again.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: RequestBody,
    handled: bool,
}

impl OutboundRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            handled: false,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    pub fn clear_handled(&mut self) {
        self.handled = false;
    }

    /// Absolute URL string, as recorded in exchanges and compared by queries.
    pub fn url(&self) -> String {
        self.uri.to_string()
    }

    /// Clone the request when its body is materialized. Stream bodies cannot be
    /// cloned without consuming them.
    pub fn try_clone(&self) -> Option<Self> {
        let body = match &self.body {
            RequestBody::Empty => RequestBody::Empty,
            RequestBody::Bytes(bytes) => RequestBody::Bytes(bytes.clone()),
            RequestBody::Stream(_) => return None,
        };
        Some(Self {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            body,
            handled: self.handled,
        })
    }
}

/// Response status line and headers, delivered before any body data.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// URL of the request that produced this response.
    pub url: String,
}

impl ResponseHead {
    pub fn is_redirect(&self) -> bool {
        matches!(self.status.as_u16(), 301 | 302 | 303 | 307 | 308)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `max` bytes per call.
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        max: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let len = buf.len().min(self.max);
            self.inner.read(&mut buf[..len])
        }
    }

    #[test]
    fn test_drain_reads_until_zero() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let stream = BodyStream::new(Trickle {
            inner: Cursor::new(payload.clone()),
            max: 7,
        });
        let drained = stream.drain(1024).unwrap();
        assert_eq!(drained.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_drain_empty_stream() {
        let stream = BodyStream::new(Cursor::new(Vec::new()));
        assert!(stream.drain(1024).unwrap().is_empty());
    }

    #[test]
    fn test_handled_marker() {
        let mut req = OutboundRequest::new(Method::GET, "https://example.com/a".parse().unwrap());
        assert!(!req.is_handled());
        req.mark_handled();
        assert!(req.is_handled());
        let clone = req.try_clone().unwrap();
        assert!(clone.is_handled());
        req.clear_handled();
        assert!(!req.is_handled());
    }

    #[test]
    fn test_request_is_shareable_across_threads() {
        // Session tasks hold `&OutboundRequest` across awaits on a multi-threaded runtime.
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BodyStream>();
        assert_send_sync::<RequestBody>();
        assert_send_sync::<OutboundRequest>();
    }

    #[test]
    fn test_try_clone_refuses_streams() {
        let req = OutboundRequest::new(Method::POST, "https://example.com/a".parse().unwrap())
            .with_body(RequestBody::Stream(BodyStream::new(Cursor::new(vec![1, 2]))));
        assert!(req.try_clone().is_none());
        assert!(req.body.is_stream());
    }

    #[test]
    fn test_redirect_statuses() {
        let head = |code: u16| ResponseHead {
            status: StatusCode::from_u16(code).unwrap(),
            headers: HeaderMap::new(),
            url: "https://example.com/".into(),
        };
        assert!(head(302).is_redirect());
        assert!(head(308).is_redirect());
        assert!(!head(304).is_redirect());
        assert!(!head(200).is_redirect());
    }
}
