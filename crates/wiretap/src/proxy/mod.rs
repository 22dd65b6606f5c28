//! Capture proxy listener.

mod forwarding;
mod headers;
mod network;
mod server;
mod sink;

pub use forwarding::error_response;
pub use headers::{X_WIRETAP_CAPTURED, X_WIRETAP_PASSTHROUGH};
pub use network::create_reusable_listener;
pub use server::CaptureProxy;
pub use sink::{ChannelSink, SinkHead};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::convert::Infallible;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every response the proxy writes.
pub type ProxyBody = BoxBody<Bytes, BoxError>;

pub(crate) fn full(bytes: Bytes) -> ProxyBody {
    Full::new(bytes)
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

pub(crate) fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}
