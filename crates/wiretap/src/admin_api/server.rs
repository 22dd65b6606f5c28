//! Admin API server.

use crate::admin_api::router::route_request;
use crate::capture::CaptureStore;
use chrono::{DateTime, Utc};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Shared by every admin request.
pub struct AdminState {
    pub store: Arc<CaptureStore>,
    /// Wait timeout when `timeoutMs` is omitted.
    pub default_timeout: Duration,
    /// Default `since` for waits.
    pub started_at: DateTime<Utc>,
}

/// Admin API server for wiretap
pub struct AdminApiServer {
    addr: SocketAddr,
    state: Arc<AdminState>,
}

impl AdminApiServer {
    pub fn new(addr: SocketAddr, store: Arc<CaptureStore>, default_timeout: Duration) -> Self {
        Self {
            addr,
            state: Arc::new(AdminState {
                store,
                default_timeout,
                started_at: Utc::now(),
            }),
        }
    }

    /// Override the default `since` used by waits.
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.started_at = started_at;
        }
        self
    }

    /// Bind the configured address and serve.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        info!("Wiretap admin API listening on http://{}", listener.local_addr()?);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { route_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Admin API connection error: {}", e);
                }
            });
        }
    }
}
