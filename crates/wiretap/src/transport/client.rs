//! Pooled HTTP client backing the shared transport session.

use super::tls::AcceptAnyServerCert;
use crate::config::SessionConfig;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Type alias for the HTTP client used by the session and pass-through forwarding.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, BoxBody<Bytes, hyper::Error>>;

/// Create the shared HTTP/1.1 client with connection pooling.
pub fn create_http_client(session: &SessionConfig) -> Result<HttpClient, anyhow::Error> {
    let pool = &session.connection_pool;

    // Both ring and aws-lc-rs may be compiled in; pin the process-wide provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.enforce_http(false);

    let https_connector = if session.tls_skip_verify {
        warn!("TLS certificate verification DISABLED for upstream requests (testing only)");
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(
                rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                    .with_no_client_auth(),
            )
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    } else {
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| anyhow::anyhow!("Failed to load native root certificates: {e}"))?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    };

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(https_connector);

    info!(
        "Connection pool configured (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s",
        pool.max_idle_per_host, pool.idle_timeout_secs, pool.keepalive_timeout_secs
    );

    Ok(http_client)
}

/// Box a fully materialized body for the client.
pub fn full_body(bytes: Bytes) -> BoxBody<Bytes, hyper::Error> {
    if bytes.is_empty() {
        return empty_body();
    }
    BoxBody::new(Full::new(bytes).map_err(|never: Infallible| match never {}))
}

pub fn empty_body() -> BoxBody<Bytes, hyper::Error> {
    BoxBody::new(Empty::<Bytes>::new().map_err(|never: Infallible| match never {}))
}
