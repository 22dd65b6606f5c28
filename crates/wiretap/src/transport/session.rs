//! The shared transport session and its tasks.
//!
//! A session owns one pooled client. Every task runs as its own Tokio task and
//! reports through a single event stream supplied at creation. Events that need
//! a decision carry a one-shot reply; a reply dropped unanswered is read as the
//! default answer.

use super::client::{full_body, HttpClient};
use super::events::{
    AuthChallenge, AuthDisposition, EventKind, EventSender, Reply, ResponseDisposition,
    SendProgress, SessionEvent, TaskId,
};
use super::hooks::InterceptionHook;
use super::request::{BodyStream, OutboundRequest, RequestBody, ResponseHead};
use crate::error::TransportError;
use base64::Engine;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION, TRANSFER_ENCODING,
    WWW_AUTHENTICATE,
};
use hyper::{Method, Request, Response, StatusCode, Uri};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tracing::debug;

/// Read size used when the session itself has to drain a body stream.
const STREAM_CHUNK_SIZE: usize = 1024;

/// A session that can create transport tasks.
pub trait TransportSession: Send + Sync {
    /// Create a suspended task. Nothing is sent until `resume`.
    fn create_task(
        &self,
        id: TaskId,
        request: OutboundRequest,
        events: EventSender,
    ) -> Arc<dyn TransportTask>;
}

/// One request in flight on a session.
pub trait TransportTask: Send + Sync {
    fn id(&self) -> TaskId;

    fn resume(&self);

    /// Cancel the task. The task completes with `TransportError::Cancelled`
    /// unless it already completed.
    fn cancel(&self);
}

/// Transport session on top of the pooled hyper client.
pub struct HyperSession {
    shared: Arc<SessionShared>,
    runtime: Handle,
}

struct SessionShared {
    client: HttpClient,
    hooks: Vec<Arc<dyn InterceptionHook>>,
    max_redirects: usize,
}

impl HyperSession {
    /// Must be called from within a Tokio runtime; tasks are spawned on it.
    pub fn new(
        client: HttpClient,
        hooks: Vec<Arc<dyn InterceptionHook>>,
        max_redirects: usize,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                client,
                hooks,
                max_redirects,
            }),
            runtime: Handle::current(),
        }
    }

    pub fn hook_names(&self) -> Vec<&'static str> {
        self.shared.hooks.iter().map(|h| h.name()).collect()
    }
}

impl TransportSession for HyperSession {
    fn create_task(
        &self,
        id: TaskId,
        request: OutboundRequest,
        events: EventSender,
    ) -> Arc<dyn TransportTask> {
        Arc::new(HyperTask {
            id,
            pending: Mutex::new(Some((request, events))),
            cancel: Arc::new(CancelSignal::default()),
            shared: Arc::clone(&self.shared),
            runtime: self.runtime.clone(),
        })
    }
}

#[derive(Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // notify_one keeps a permit when nobody is waiting yet
        self.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

struct HyperTask {
    id: TaskId,
    pending: Mutex<Option<(OutboundRequest, EventSender)>>,
    cancel: Arc<CancelSignal>,
    shared: Arc<SessionShared>,
    runtime: Handle,
}

impl TransportTask for HyperTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn resume(&self) {
        let Some((request, events)) = self.pending.lock().take() else {
            return;
        };
        let id = self.id;
        let cancel = Arc::clone(&self.cancel);
        let shared = Arc::clone(&self.shared);

        self.runtime.spawn(async move {
            let result = if cancel.is_cancelled() {
                Err(TransportError::Cancelled)
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TransportError::Cancelled),
                    result = drive(id, request, &events, &shared) => result,
                }
            };
            debug!("{} finished: {:?}", id, result);
            emit(&events, id, EventKind::Completed(result));
        });
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

fn emit(events: &EventSender, task_id: TaskId, kind: EventKind) {
    // The dispatcher may already be gone during shutdown.
    let _ = events.send(SessionEvent { task_id, kind });
}

/// Emit an event carrying a reply channel and wait for the answer.
/// `None` means the reply was dropped unanswered.
async fn ask<T>(
    events: &EventSender,
    task_id: TaskId,
    make: impl FnOnce(Reply<T>) -> EventKind,
) -> Option<T> {
    let (tx, rx) = oneshot::channel();
    emit(events, task_id, make(tx));
    rx.await.ok()
}

async fn drain_stream(stream: BodyStream) -> Result<Bytes, TransportError> {
    tokio::task::spawn_blocking(move || stream.drain(STREAM_CHUNK_SIZE))
        .await
        .map_err(|e| TransportError::Failed(format!("body stream reader panicked: {e}")))?
        .map_err(|e| TransportError::Failed(format!("failed to read body stream: {e}")))
}

async fn materialize(body: RequestBody) -> Result<Bytes, TransportError> {
    match body {
        RequestBody::Empty => Ok(Bytes::new()),
        RequestBody::Bytes(bytes) => Ok(bytes),
        RequestBody::Stream(stream) => drain_stream(stream).await,
    }
}

async fn drive(
    id: TaskId,
    mut request: OutboundRequest,
    events: &EventSender,
    shared: &SessionShared,
) -> Result<(), TransportError> {
    for hook in &shared.hooks {
        if hook.can_intercept(&request) {
            hook.prepare(&mut request);
        }
    }

    let body_was_stream = request.body.is_stream();
    let mut body = materialize(std::mem::take(&mut request.body)).await?;
    request.body = RequestBody::from(body.clone());

    let mut redirects = 0usize;
    let mut authenticated = false;

    let (head, response) = loop {
        let response = send(&shared.client, &request, &body).await?;

        if !body.is_empty() {
            let len = body.len() as u64;
            emit(
                events,
                id,
                EventKind::SentBodyData(SendProgress {
                    bytes_sent: len,
                    total_bytes_sent: len,
                    total_bytes_expected: len,
                }),
            );
        }

        let head = ResponseHead {
            status: response.status(),
            headers: response.headers().clone(),
            url: request.url(),
        };

        if head.is_redirect() {
            if let Some(follow) = redirect_request(&request, &head) {
                let fallback = follow.try_clone();
                let answer = ask(events, id, |reply| EventKind::WillRedirect {
                    response: head.clone(),
                    new_request: follow,
                    reply,
                })
                .await;
                let next = match answer {
                    Some(next) => next,
                    None => fallback,
                };
                if let Some(mut next) = next {
                    // Only enforced when a redirect is actually followed.
                    if redirects >= shared.max_redirects {
                        return Err(TransportError::Failed(format!(
                            "too many redirects (limit {})",
                            shared.max_redirects
                        )));
                    }
                    debug!("{} following redirect to {}", id, next.uri);
                    body = materialize(std::mem::take(&mut next.body)).await?;
                    next.body = RequestBody::from(body.clone());
                    request = next;
                    redirects += 1;
                    continue;
                }
            }
        }

        if head.status == StatusCode::UNAUTHORIZED && !authenticated {
            if let Some(challenge) = head
                .headers
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(|v| AuthChallenge::parse(v, request.uri.host().unwrap_or_default()))
            {
                let answer = ask(events, id, |reply| EventKind::AuthChallenge { challenge, reply })
                    .await
                    .unwrap_or_default();
                match answer {
                    AuthDisposition::UseCredential(credential) => {
                        let token = base64::engine::general_purpose::STANDARD
                            .encode(format!("{}:{}", credential.user, credential.password));
                        let value = HeaderValue::from_str(&format!("Basic {token}"))
                            .map_err(|e| TransportError::Failed(e.to_string()))?;
                        request.headers.insert(AUTHORIZATION, value);
                        authenticated = true;

                        if body_was_stream {
                            let fresh = ask(events, id, |reply| EventKind::NeedNewBodyStream {
                                reply,
                            })
                            .await
                            .flatten()
                            .ok_or_else(|| {
                                TransportError::Failed(
                                    "no new body stream supplied for retry".to_string(),
                                )
                            })?;
                            body = materialize(fresh).await?;
                            request.body = RequestBody::from(body.clone());
                        }
                        continue;
                    }
                    AuthDisposition::Cancel => return Err(TransportError::Cancelled),
                    AuthDisposition::PerformDefaultHandling
                    | AuthDisposition::RejectProtectionSpace => {}
                }
            }
        }

        break (head, response);
    };

    let disposition = ask(events, id, |reply| EventKind::ReceivedResponse {
        response: head,
        reply,
    })
    .await
    .unwrap_or_default();

    match disposition {
        ResponseDisposition::Allow => {}
        ResponseDisposition::Cancel => return Err(TransportError::Cancelled),
        ResponseDisposition::BecomeDownload => {
            emit(events, id, EventKind::BecameDownloadTask);
            return Ok(());
        }
    }

    let mut incoming = response.into_body();
    while let Some(frame) = incoming.frame().await {
        let frame = frame?;
        if let Ok(data) = frame.into_data() {
            if !data.is_empty() {
                emit(events, id, EventKind::ReceivedData(data));
            }
        }
    }

    Ok(())
}

async fn send(
    client: &HttpClient,
    request: &OutboundRequest,
    body: &Bytes,
) -> Result<Response<Incoming>, TransportError> {
    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(request.uri.clone());
    for (name, value) in request.headers.iter() {
        if name != HOST {
            builder = builder.header(name, value);
        }
    }
    let upstream_req = builder
        .body(full_body(body.clone()))
        .map_err(|e| TransportError::Failed(e.to_string()))?;

    Ok(client.request(upstream_req).await?)
}

/// Build the follow-up request for a 3xx response carrying `Location`.
fn redirect_request(current: &OutboundRequest, head: &ResponseHead) -> Option<OutboundRequest> {
    let location = head.headers.get(LOCATION)?.to_str().ok()?;
    let target = resolve_location(&current.uri, location)?;

    let status = head.status.as_u16();
    let becomes_get = status == 303
        || ((status == 301 || status == 302)
            && current.method != Method::GET
            && current.method != Method::HEAD);

    let method = if becomes_get {
        Method::GET
    } else {
        current.method.clone()
    };

    let mut headers = current.headers.clone();
    headers.remove(HOST);
    if target.authority() != current.uri.authority() {
        headers.remove(AUTHORIZATION);
    }

    let body = if becomes_get {
        headers.remove(CONTENT_TYPE);
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
        RequestBody::Empty
    } else {
        match &current.body {
            RequestBody::Bytes(bytes) => RequestBody::Bytes(bytes.clone()),
            _ => RequestBody::Empty,
        }
    };

    let mut next = OutboundRequest::new(method, target)
        .with_headers(headers)
        .with_body(body);
    if current.is_handled() {
        next.mark_handled();
    }
    Some(next)
}

/// Resolve a `Location` value against the URL that produced it.
pub(crate) fn resolve_location(base: &Uri, location: &str) -> Option<Uri> {
    if let Ok(uri) = location.parse::<Uri>() {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Some(uri);
        }
    }

    let scheme = base.scheme_str()?;
    let authority = base.authority()?.as_str();

    let resolved = if let Some(rest) = location.strip_prefix("//") {
        format!("{scheme}://{rest}")
    } else if location.starts_with('/') {
        format!("{scheme}://{authority}{location}")
    } else {
        let path = base.path();
        let dir = match path.rfind('/') {
            Some(idx) => &path[..=idx],
            None => "/",
        };
        format!("{scheme}://{authority}{dir}{location}")
    };

    resolved.parse().ok()
}
