//! Response types for the Admin API.

use crate::exchange::Exchange;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// A body rendered as UTF-8 text when possible and base64 otherwise.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BodySummary {
    pub encoding: &'static str,
    pub data: String,
}

impl BodySummary {
    fn from_bytes(bytes: &Bytes) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        Some(match std::str::from_utf8(bytes) {
            Ok(text) => Self {
                encoding: "utf8",
                data: text.to_string(),
            },
            Err(_) => Self {
                encoding: "base64",
                data: BASE64.encode(bytes),
            },
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorSummary {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSummary {
    pub sequence: u64,
    pub method: String,
    pub url: String,
    /// 0 when no response was received.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    pub start_time: String,
    pub end_time: String,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<BodySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<BodySummary>,
}

impl From<&Exchange> for ExchangeSummary {
    fn from(exchange: &Exchange) -> Self {
        Self {
            sequence: exchange.sequence(),
            method: exchange.method().to_string(),
            url: exchange.url().to_string(),
            status: exchange.status_code(),
            error: exchange.error().map(|e| ErrorSummary {
                kind: e.kind.as_str(),
                message: e.message.clone(),
            }),
            start_time: exchange
                .start_time()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            end_time: exchange
                .end_time()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: exchange.duration_ms(),
            request_body: BodySummary::from_bytes(&exchange.request().body),
            response_body: exchange
                .response()
                .and_then(|r| BodySummary::from_bytes(&r.body)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub exchanges: Vec<ExchangeSummary>,
}

#[derive(Debug, Serialize)]
pub struct WaitResponse {
    pub satisfied: bool,
    pub exchanges: Vec<ExchangeSummary>,
}

/// Query parameters of `GET /exchanges/wait`
#[derive(Debug, Clone, PartialEq)]
pub struct WaitParams {
    pub path: String,
    pub method: String,
    pub since: Option<DateTime<Utc>>,
    pub timeout_ms: Option<u64>,
    pub count: usize,
}

impl WaitParams {
    pub fn parse(query: Option<&str>) -> Result<Self, String> {
        let mut params = WaitParams {
            path: String::new(),
            method: "GET".to_string(),
            since: None,
            timeout_ms: None,
            count: 1,
        };
        let mut has_path = false;

        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(raw)
                .map_err(|e| format!("Invalid encoding for '{key}': {e}"))?
                .into_owned();

            match key {
                "path" => {
                    params.path = value;
                    has_path = true;
                }
                "method" => params.method = value.to_ascii_uppercase(),
                "since" => params.since = Some(parse_since(&value)?),
                "timeoutMs" => {
                    params.timeout_ms = Some(
                        value
                            .parse()
                            .map_err(|_| format!("Invalid timeoutMs '{value}'"))?,
                    )
                }
                "count" => {
                    params.count = value
                        .parse()
                        .map_err(|_| format!("Invalid count '{value}'"))?
                }
                _ => {}
            }
        }

        if !has_path {
            return Err("Missing required query parameter 'path'".to_string());
        }
        Ok(params)
    }
}

/// RFC 3339 timestamp or milliseconds since the Unix epoch.
fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(millis) = value.parse::<i64>() {
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| format!("Invalid since '{value}'"));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid since '{value}': {e}"))
}

// =============================================================================
// Response helper functions
// =============================================================================

/// Create a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    build_response_with_headers(status, [("Content-Type", "application/json")], json)
}

/// Build an HTTP response with headers.
///
/// Falls back to a bare response if the builder rejects the inputs.
pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}

/// Create an error response
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let error = ErrorResponse {
        errors: vec![ErrorDetail {
            code: status.as_str().to_string(),
            message: message.to_string(),
        }],
    };
    json_response(status, &error)
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::exchange::{RequestSnapshot, ResponseSnapshot};
    use hyper::{HeaderMap, Method};

    #[test]
    fn test_wait_params_defaults() {
        let params = WaitParams::parse(Some("path=example")).unwrap();
        assert_eq!(params.path, "example");
        assert_eq!(params.method, "GET");
        assert_eq!(params.count, 1);
        assert!(params.since.is_none());
        assert!(params.timeout_ms.is_none());
    }

    #[test]
    fn test_wait_params_full() {
        let params = WaitParams::parse(Some(
            "path=api%2Fitems%3Fq%3D1&method=post&since=1700000000000&timeoutMs=250&count=3",
        ))
        .unwrap();
        assert_eq!(params.path, "api/items?q=1");
        assert_eq!(params.method, "POST");
        assert_eq!(params.since.unwrap().timestamp_millis(), 1_700_000_000_000);
        assert_eq!(params.timeout_ms, Some(250));
        assert_eq!(params.count, 3);
    }

    #[test]
    fn test_wait_params_rfc3339_since() {
        let params =
            WaitParams::parse(Some("path=x&since=2024-01-02T03%3A04%3A05Z")).unwrap();
        assert_eq!(
            params.since.unwrap().to_rfc3339_opts(SecondsFormat::Secs, true),
            "2024-01-02T03:04:05Z"
        );
    }

    #[test]
    fn test_wait_params_errors() {
        assert!(WaitParams::parse(None).is_err());
        assert!(WaitParams::parse(Some("path=x&count=many")).is_err());
        assert!(WaitParams::parse(Some("path=x&since=yesterday")).is_err());
        assert!(WaitParams::parse(Some("path=x&timeoutMs=-1")).is_err());
    }

    #[test]
    fn test_exchange_summary() {
        let start = Utc.timestamp_millis_opt(1_000).unwrap();
        let exchange = Exchange::new(
            RequestSnapshot::new(Method::POST, "https://example.com/upload")
                .with_body(Bytes::from_static(&[0xff, 0x00, 0x01])),
            start,
        )
        .with_response(ResponseSnapshot {
            status: StatusCode::CREATED,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{\"ok\":true}"),
        })
        .finished_at(Utc.timestamp_millis_opt(1_250).unwrap());

        let summary = ExchangeSummary::from(&exchange);
        assert_eq!(summary.method, "POST");
        assert_eq!(summary.status, 201);
        assert_eq!(summary.start_time, "1970-01-01T00:00:01.000Z");
        assert_eq!(summary.duration_ms, 250.0);
        assert_eq!(summary.request_body.unwrap().encoding, "base64");
        assert_eq!(
            summary.response_body,
            Some(BodySummary {
                encoding: "utf8",
                data: "{\"ok\":true}".to_string()
            })
        );
        assert!(summary.error.is_none());
    }

    #[test]
    fn test_exchange_summary_with_error() {
        let exchange = Exchange::new(
            RequestSnapshot::new(Method::GET, "https://example.com/down"),
            Utc::now(),
        )
        .with_error((&CaptureError::TransportFailed("connection refused".into())).into());

        let json = serde_json::to_value(ExchangeSummary::from(&exchange)).unwrap();
        assert_eq!(json["status"], 0);
        assert_eq!(json["error"]["kind"], "transport_failed");
        assert!(json.get("requestBody").is_none());
    }

    #[test]
    fn test_error_response_format() {
        let resp = error_response(StatusCode::BAD_REQUEST, "Test error");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_not_found_response() {
        assert_eq!(not_found().status(), StatusCode::NOT_FOUND);
    }
}
