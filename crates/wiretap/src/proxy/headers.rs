//! Header helpers for proxied responses.
//!
//! Static header names and values for wiretap's own response headers, plus the
//! hop-by-hop headers that never cross the proxy.

use hyper::header::{HeaderName, HeaderValue};
use hyper::http::response::Parts;
use hyper::{HeaderMap, Response};

pub static X_WIRETAP_CAPTURED: HeaderName = HeaderName::from_static("x-wiretap-captured");
pub static X_WIRETAP_PASSTHROUGH: HeaderName = HeaderName::from_static("x-wiretap-passthrough");

pub static VALUE_TRUE: HeaderValue = HeaderValue::from_static("true");

/// Connection-scoped headers dropped in both directions.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Extension trait for inserting wiretap headers into responses.
pub trait WiretapHeadersExt {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// Returns false if the value couldn't be converted to a valid header value.
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool;
}

impl<B> WiretapHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }

    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        insert_str(self.headers_mut(), name, value)
    }
}

impl WiretapHeadersExt for Parts {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers.insert(name.clone(), value.clone());
    }

    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        insert_str(&mut self.headers, name, value)
    }
}

fn insert_str(headers: &mut HeaderMap, name: &HeaderName, value: &str) -> bool {
    match HeaderValue::from_str(value) {
        Ok(header_value) => {
            headers.insert(name.clone(), header_value);
            true
        }
        Err(_) => false,
    }
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    for name in listed {
        headers.remove(name.as_str());
    }
}
