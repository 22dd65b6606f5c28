//! Interception hooks installed on a transport session.

use super::request::OutboundRequest;
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use std::collections::BTreeMap;

/// A hook the session consults for every request it sends.
///
/// `can_intercept` decides whether the hook wants the request at all;
/// `prepare` may then adjust it before it goes on the wire.
pub trait InterceptionHook: Send + Sync {
    /// Stable name, used to filter hooks out of a session's hook list.
    fn name(&self) -> &'static str;

    fn can_intercept(&self, request: &OutboundRequest) -> bool;

    fn prepare(&self, _request: &mut OutboundRequest) {}
}

/// Stamps a fixed set of headers onto every request.
#[derive(Debug, Clone, Default)]
pub struct HeaderHook {
    headers: HeaderMap,
}

impl HeaderHook {
    pub const NAME: &'static str = "header";

    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Build from configured name/value pairs.
    pub fn from_pairs(pairs: &BTreeMap<String, String>) -> Result<Self, anyhow::Error> {
        let mut headers = HeaderMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow::anyhow!("Invalid header name '{name}': {e}"))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| anyhow::anyhow!("Invalid value for header '{name}': {e}"))?;
            headers.insert(name, value);
        }
        Ok(Self { headers })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl InterceptionHook for HeaderHook {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_intercept(&self, _request: &OutboundRequest) -> bool {
        !self.headers.is_empty()
    }

    fn prepare(&self, request: &mut OutboundRequest) {
        for (name, value) in &self.headers {
            request.headers.insert(name.clone(), value.clone());
        }
    }
}
