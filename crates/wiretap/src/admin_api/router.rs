//! Route dispatch logic for the Admin API.

use crate::admin_api::handlers::{exchanges, system};
use crate::admin_api::server::AdminState;
use crate::admin_api::types::not_found;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::sync::Arc;
use tracing::debug;

/// Main request router
pub async fn route_request(
    req: Request<Incoming>,
    state: Arc<AdminState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|s| s.to_string());

    debug!("Admin API: {} {}", method, path);

    Ok(route_by_path(&method, &path, query.as_deref(), &state).await)
}

async fn route_by_path(
    method: &Method,
    path: &str,
    query: Option<&str>,
    state: &AdminState,
) -> Response<Full<Bytes>> {
    match (method, path.trim_end_matches('/')) {
        (&Method::GET, "/health") => system::handle_health(),
        (&Method::GET, "/metrics") => system::handle_metrics(),
        (&Method::GET, "/exchanges") => exchanges::handle_list(state),
        (&Method::DELETE, "/exchanges") => exchanges::handle_reset(state),
        (&Method::GET, "/exchanges/wait") => exchanges::handle_wait(state, query).await,
        _ => not_found(),
    }
}
