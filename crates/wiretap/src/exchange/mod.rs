//! Captured exchanges.
//!
//! An `Exchange` is the immutable record of one intercepted request and its
//! outcome. The capture store assigns each exchange its completion sequence
//! on append and shares it as `Arc<Exchange>` from then on.

pub mod multipart;

use crate::error::{CaptureError, ErrorKind};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use hyper::header::CONTENT_TYPE;
use hyper::{HeaderMap, Method, StatusCode};
use multipart::MultipartPart;
use serde_json::{Map, Value};
use std::fmt;
use std::io::Read;
use std::time::Duration;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestSnapshot {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSnapshot {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&CaptureError> for ErrorSnapshot {
    fn from(err: &CaptureError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One completed interception.
#[derive(Debug, Clone)]
pub struct Exchange {
    sequence: u64,
    request: RequestSnapshot,
    response: Option<ResponseSnapshot>,
    error: Option<ErrorSnapshot>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl Exchange {
    /// A new exchange that started (and, until `finished_at`, ended) at `start_time`.
    pub fn new(request: RequestSnapshot, start_time: DateTime<Utc>) -> Self {
        Self {
            sequence: 0,
            request,
            response: None,
            error: None,
            start_time,
            end_time: start_time,
        }
    }

    pub fn with_response(mut self, response: ResponseSnapshot) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_error(mut self, error: ErrorSnapshot) -> Self {
        self.error = Some(error);
        self
    }

    pub fn finished_at(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = end_time;
        self
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Completion order within the store, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn request(&self) -> &RequestSnapshot {
        &self.request
    }

    pub fn response(&self) -> Option<&ResponseSnapshot> {
        self.response.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorSnapshot> {
        self.error.as_ref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    /// Response status code, or 0 when there is no response.
    pub fn status_code(&self) -> u16 {
        self.response.as_ref().map_or(0, |r| r.status.as_u16())
    }

    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time).to_std().unwrap_or_default()
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration().as_secs_f64() * 1000.0
    }

    pub fn response_json(&self) -> Option<Value> {
        let body = &self.response.as_ref()?.body;
        match serde_json::from_slice(body) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("Response body of {} is not JSON: {}", self.request.url, e);
                None
            }
        }
    }

    /// The request body as a JSON object. Other JSON values yield `None`.
    pub fn request_body_json(&self) -> Option<Map<String, Value>> {
        match serde_json::from_slice(&self.request.body).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn request_body_value(&self, key: &str) -> Option<Value> {
        self.request_body_json()?.remove(key)
    }

    /// Decode the request body as multipart form data, using the boundary from
    /// the request's `Content-Type` when present.
    pub fn multipart_parts(&self) -> Option<Vec<MultipartPart>> {
        let boundary = self
            .request
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(multipart::boundary_from_content_type)
            .unwrap_or_else(|| multipart::DEFAULT_BOUNDARY.to_string());
        multipart::decode(&self.request.body, &boundary)
    }

    /// Whether this exchange answers a query for `url`/`method` started at or after `since`.
    pub fn matches(&self, url: &str, method: &str, since: DateTime<Utc>) -> bool {
        self.request.method.as_str() == method && self.request.url == url && self.start_time >= since
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.sequence, self.request.method, self.request.url)?;
        match (&self.response, &self.error) {
            (_, Some(error)) => write!(f, " -> error ({})", error.message)?,
            (Some(response), None) => write!(f, " -> {}", response.status.as_u16())?,
            (None, None) => write!(f, " -> no response")?,
        }
        write!(f, " in {:.1}ms", self.duration_ms())
    }
}

/// Gunzip `body` when it carries the gzip magic and decodes to a non-empty
/// buffer. Anything else is returned unchanged.
pub fn decode_request_body(body: Bytes) -> Bytes {
    if !body.starts_with(&GZIP_MAGIC) {
        return body;
    }
    let mut decoded = Vec::new();
    match GzDecoder::new(body.as_ref()).read_to_end(&mut decoded) {
        Ok(_) if !decoded.is_empty() => Bytes::from(decoded),
        Ok(_) => body,
        Err(e) => {
            tracing::debug!("Request body has gzip magic but failed to decode: {}", e);
            body
        }
    }
}
