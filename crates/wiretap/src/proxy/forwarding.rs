//! Pass-through forwarding for requests the capture hook declines, and the
//! shared error response.

use super::headers::{strip_hop_by_hop, WiretapHeadersExt, VALUE_TRUE, X_WIRETAP_PASSTHROUGH};
use super::{full, ProxyBody};
use crate::transport::{full_body, HttpClient, OutboundRequest, RequestBody};
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::http::uri::Authority;
use hyper::{Request, Response, StatusCode};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, error};

/// JSON error response, `{"error": message}`.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(full(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    response
}

/// Forward an origin-form request to `http://{Host}{path}` without capturing it.
pub async fn pass_through(http_client: &HttpClient, request: OutboundRequest) -> Response<ProxyBody> {
    let Some(host) = request
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return error_response(StatusCode::BAD_REQUEST, "Request has no absolute URL and no Host header");
    };

    let path = request.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let full_uri = format!("http://{host}{path}");
    debug!("Passing through to: {}", full_uri);

    let mut upstream_req = Request::builder().method(request.method).uri(&full_uri);
    for (key, value) in request.headers.iter() {
        if key != HOST {
            upstream_req = upstream_req.header(key, value);
        }
    }
    // Hop marker: a request that comes back carrying it is a loop.
    upstream_req = upstream_req.header(&X_WIRETAP_PASSTHROUGH, &VALUE_TRUE);

    let body = match request.body {
        RequestBody::Bytes(bytes) => bytes,
        _ => Bytes::new(),
    };
    let upstream_req = match upstream_req.body(full_body(body)) {
        Ok(req) => req,
        Err(e) => {
            error!("Invalid pass-through request to {}: {}", full_uri, e);
            return error_response(StatusCode::BAD_REQUEST, "Invalid request");
        }
    };

    match http_client.request(upstream_req).await {
        Ok(upstream_response) => {
            let (mut parts, body) = upstream_response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            parts.set_header(&X_WIRETAP_PASSTHROUGH, &VALUE_TRUE);
            Response::from_parts(parts, body.map_err(Into::into).boxed())
        }
        Err(e) => {
            error!("Failed to pass request through to {}: {}", full_uri, e);
            error_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
        }
    }
}

/// Whether a `Host` authority names the proxy's own listener.
pub fn targets_listener(host: &str, listener: SocketAddr) -> bool {
    let Ok(authority) = host.parse::<Authority>() else {
        return false;
    };
    if authority.port_u16().unwrap_or(80) != listener.port() {
        return false;
    }

    let name = authority.host().trim_start_matches('[').trim_end_matches(']');
    if name.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match name.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback() || ip == listener.ip(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_response_is_json() {
        let response = error_response(StatusCode::BAD_GATEWAY, "upstream said \"no\"");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "upstream said \"no\"");
    }

    #[test]
    fn test_targets_listener() {
        let listener: SocketAddr = "127.0.0.1:8899".parse().unwrap();
        assert!(targets_listener("127.0.0.1:8899", listener));
        assert!(targets_listener("localhost:8899", listener));
        assert!(targets_listener("[::1]:8899", listener));
        assert!(!targets_listener("127.0.0.1:9000", listener));
        assert!(!targets_listener("api.local:8899", listener));
        assert!(!targets_listener("10.1.2.3:8899", listener));

        let wildcard: SocketAddr = "0.0.0.0:80".parse().unwrap();
        assert!(targets_listener("localhost", wildcard));
        assert!(!targets_listener("example.com", wildcard));

        let bound: SocketAddr = "10.1.2.3:8899".parse().unwrap();
        assert!(targets_listener("10.1.2.3:8899", bound));
    }
}
