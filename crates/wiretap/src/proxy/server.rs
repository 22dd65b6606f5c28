//! CaptureProxy struct and main run loop.
//!
//! Code under test points its HTTP client at this listener as a forward proxy.
//! Absolute-form requests are intercepted and captured; anything else passes
//! straight through.

use super::forwarding::{error_response, pass_through, targets_listener};
use super::headers::{
    strip_hop_by_hop, WiretapHeadersExt, VALUE_TRUE, X_WIRETAP_CAPTURED, X_WIRETAP_PASSTHROUGH,
};
use super::network::create_reusable_listener;
use super::sink::{ChannelSink, InterceptedBody, SinkHead, StopGuard};
use super::{empty, BoxError, ProxyBody};
use crate::context::ExecutionContext;
use crate::error::CaptureError;
use crate::harness::Harness;
use crate::interceptor::CaptureHook;
use crate::transport::{create_http_client, HttpClient, OutboundRequest, RequestBody};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, HOST, LOCATION, TRANSFER_ENCODING};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

pub struct CaptureProxy {
    harness: Arc<Harness>,
    http_client: HttpClient,
}

impl CaptureProxy {
    /// `session` configures the pass-through client; intercepted traffic uses
    /// the harness's own session.
    pub fn new(
        harness: Arc<Harness>,
        session: &crate::config::SessionConfig,
    ) -> Result<Self, anyhow::Error> {
        Ok(Self {
            harness,
            http_client: create_http_client(session)?,
        })
    }

    pub fn harness(&self) -> &Arc<Harness> {
        &self.harness
    }

    /// Bind `addr` and serve until the listener fails.
    pub async fn run(self, addr: SocketAddr) -> Result<(), anyhow::Error> {
        let listener = create_reusable_listener(addr)?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        let local_addr = listener.local_addr()?;
        info!("Capture proxy listening on http://{}", local_addr);
        info!(
            "Matching captured URLs against base URL {}",
            self.harness.store().base_url()
        );

        let proxy = Arc::new(self);
        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let proxy = Arc::clone(&proxy);

            tokio::spawn(async move {
                let context = ExecutionContext::spawn_serial(format!("conn-{remote_addr}"));
                let service_context = context.clone();
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let proxy = Arc::clone(&proxy);
                    let context = service_context.clone();
                    async move { proxy.handle_request(req, local_addr, context).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", remote_addr, err);
                }
                context.shutdown();
            });
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
        local_addr: SocketAddr,
        context: ExecutionContext,
    ) -> Result<Response<ProxyBody>, Infallible> {
        let (parts, body) = req.into_parts();

        if parts.method == Method::CONNECT {
            warn!("CONNECT to {} refused: tunnels cannot be captured", parts.uri);
            return Ok(error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "CONNECT tunnelling is not supported; send plain HTTP through the proxy",
            ));
        }

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                error!("Failed to read request body: {}", e);
                return Ok(error_response(StatusCode::BAD_REQUEST, "Failed to read request body"));
            }
        };

        let mut headers = parts.headers;
        headers.remove("proxy-connection");
        headers.remove("proxy-authorization");
        headers.remove(TRANSFER_ENCODING);

        let request = OutboundRequest::new(parts.method, parts.uri)
            .with_headers(headers)
            .with_body(RequestBody::from(body));

        if let Err(reason) = CaptureHook::check(&request) {
            debug!("{}", reason);
            let looped = request.headers.contains_key(&X_WIRETAP_PASSTHROUGH)
                || request
                    .headers
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|host| targets_listener(host, local_addr));
            if looped {
                warn!("Refusing pass-through of {} back to this proxy", request.uri);
                return Ok(error_response(
                    StatusCode::LOOP_DETECTED,
                    "Pass-through target is this proxy",
                ));
            }
            return Ok(pass_through(&self.http_client, request).await);
        }

        Ok(self.intercept(request, context).await)
    }

    async fn intercept(&self, request: OutboundRequest, context: ExecutionContext) -> Response<ProxyBody> {
        let (sink, head_rx, body_rx) = ChannelSink::new();

        let interceptor = match self.harness.intercept(request, sink, context) {
            Ok(interceptor) => interceptor,
            Err(err) => return capture_error_response(&err),
        };
        // Dropped with this future if the client disconnects before the head.
        let guard = StopGuard::new(interceptor);

        match head_rx.await {
            Ok(SinkHead::Response(head)) => {
                let mut headers = head.headers;
                strip_hop_by_hop(&mut headers);

                let body = InterceptedBody::new(body_rx, guard.disarm())
                    .map_err(|e| -> BoxError { Box::new(e) })
                    .boxed();
                let mut response = Response::new(body);
                *response.status_mut() = head.status;
                *response.headers_mut() = headers;
                response.set_header(&X_WIRETAP_CAPTURED, &VALUE_TRUE);
                response
            }
            Ok(SinkHead::Redirect { status, location }) => {
                guard.disarm();
                let mut response = Response::new(empty());
                *response.status_mut() = status;
                match HeaderValue::from_str(&location) {
                    Ok(value) => {
                        response.headers_mut().insert(LOCATION, value);
                    }
                    Err(e) => warn!("Redirect target {} is not a valid header: {}", location, e),
                }
                response
            }
            Ok(SinkHead::Failed(err)) => {
                guard.disarm();
                capture_error_response(&err)
            }
            Err(_) => {
                guard.disarm();
                error_response(StatusCode::BAD_GATEWAY, "Interception ended without a response")
            }
        }
    }
}

fn capture_error_response(err: &CaptureError) -> Response<ProxyBody> {
    let status = match err {
        CaptureError::InterceptionIneligible(_) | CaptureError::BodyRead(_) => StatusCode::BAD_REQUEST,
        CaptureError::TransportCancelled | CaptureError::TransportFailed(_) => StatusCode::BAD_GATEWAY,
    };
    error_response(status, &err.to_string())
}
