//! Exchange listing, reset and wait handlers.

use crate::admin_api::server::AdminState;
use crate::admin_api::types::{
    error_response, json_response, ExchangeSummary, ListResponse, WaitParams, WaitResponse,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

/// GET /exchanges - most recent first
pub fn handle_list(state: &AdminState) -> Response<Full<Bytes>> {
    let exchanges = state
        .store
        .exchanges()
        .iter()
        .map(|e| ExchangeSummary::from(e.as_ref()))
        .collect();
    json_response(StatusCode::OK, &ListResponse { exchanges })
}

/// DELETE /exchanges
pub fn handle_reset(state: &AdminState) -> Response<Full<Bytes>> {
    state.store.reset();
    info!("Exchanges cleared via admin API");
    json_response(StatusCode::OK, &ListResponse { exchanges: vec![] })
}

/// GET /exchanges/wait
pub async fn handle_wait(state: &AdminState, query: Option<&str>) -> Response<Full<Bytes>> {
    let params = match WaitParams::parse(query) {
        Ok(params) => params,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    let since = params.since.unwrap_or(state.started_at);
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.default_timeout);

    debug!(
        "Admin wait: {} x {} {} since {} (timeout {:?})",
        params.count, params.method, params.path, since, timeout
    );

    let matched = state
        .store
        .wait_for_many(&params.path, &params.method, since, timeout, params.count)
        .await;

    let response = WaitResponse {
        satisfied: matched.len() >= params.count,
        exchanges: matched
            .iter()
            .map(|e| ExchangeSummary::from(e.as_ref()))
            .collect(),
    };
    json_response(StatusCode::OK, &response)
}
