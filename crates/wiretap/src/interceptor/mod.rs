//! Per-request interception.
//!
//! An `Interceptor` takes one eligible request through
//! `Idle -> Cloning -> Forwarding -> Streaming` and ends in `Completed`,
//! `Failed` or `Cancelled`. It forwards a handled clone through the
//! demultiplexer, mirrors every event to the client sink, and appends the
//! finished exchange to the capture store.

mod hook;

pub use hook::CaptureHook;

use crate::capture::CaptureStore;
use crate::config::CaptureConfig;
use crate::context::ExecutionContext;
use crate::demux::{Demultiplexer, TaskDelegate, TaskHandle};
use crate::error::{CaptureError, TransportError};
use crate::exchange::{
    decode_request_body, ErrorSnapshot, Exchange, RequestSnapshot, ResponseSnapshot,
};
use crate::transport::{
    OutboundRequest, Reply, RequestBody, ResponseDisposition, ResponseHead, SendProgress, TaskId,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Receiver of the intercepted request's outcome, as the original client sees it.
///
/// Per request: at most one `received_response`, any number of
/// `received_data`, then exactly one of `finished_loading` or
/// `failed_with_error`. `was_redirected` precedes a `TransportCancelled` failure.
pub trait ClientSink: Send + Sync {
    fn received_response(&self, response: &ResponseHead);

    fn received_data(&self, data: &Bytes);

    fn failed_with_error(&self, error: CaptureError);

    fn finished_loading(&self);

    fn was_redirected(&self, request: &OutboundRequest, response: &ResponseHead);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorState {
    Idle,
    Cloning,
    Forwarding,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl InterceptorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InterceptorState::Completed | InterceptorState::Failed | InterceptorState::Cancelled
        )
    }
}

struct Inner {
    state: InterceptorState,
    request: Option<RequestSnapshot>,
    /// Bytes actually forwarded, replayed when the session asks for a new body stream.
    forwarded_body: Bytes,
    response: Option<ResponseHead>,
    data: BytesMut,
    start_time: Option<DateTime<Utc>>,
    task: Option<TaskHandle>,
    stopped: bool,
}

pub struct Interceptor {
    inner: Mutex<Inner>,
    store: Arc<CaptureStore>,
    sink: Arc<dyn ClientSink>,
    body_read_chunk_size: usize,
    decompress_request_bodies: bool,
}

impl Interceptor {
    pub fn new(
        store: Arc<CaptureStore>,
        sink: Arc<dyn ClientSink>,
        config: &CaptureConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: InterceptorState::Idle,
                request: None,
                forwarded_body: Bytes::new(),
                response: None,
                data: BytesMut::new(),
                start_time: None,
                task: None,
                stopped: false,
            }),
            store,
            sink,
            body_read_chunk_size: config.body_read_chunk_size,
            decompress_request_bodies: config.decompress_request_bodies,
        })
    }

    pub fn state(&self) -> InterceptorState {
        self.inner.lock().state
    }

    /// Clone `request` and forward it through `demux`; events are handled on `context`.
    ///
    /// Ineligible requests are rejected with `InterceptionIneligible` and the
    /// interceptor stays idle. A streamed body is drained here with blocking
    /// reads before anything is forwarded; a read failure is captured and
    /// reported to the sink like a transport failure.
    pub fn start(
        self: &Arc<Self>,
        mut request: OutboundRequest,
        demux: &Demultiplexer,
        context: ExecutionContext,
    ) -> Result<(), CaptureError> {
        CaptureHook::check(&request)?;
        self.inner.lock().state = InterceptorState::Cloning;

        let url = request.url();
        let body = match std::mem::take(&mut request.body) {
            RequestBody::Empty => Ok(Bytes::new()),
            RequestBody::Bytes(bytes) => Ok(bytes),
            RequestBody::Stream(stream) => stream
                .drain(self.body_read_chunk_size)
                .map_err(|e| CaptureError::BodyRead(e.to_string())),
        };

        let snapshot_body = |bytes: &Bytes| {
            if self.decompress_request_bodies {
                decode_request_body(bytes.clone())
            } else {
                bytes.clone()
            }
        };

        let body = match body {
            Ok(body) => body,
            Err(err) => {
                warn!("Failed to read body of {} {}: {}", request.method, url, err);
                let now = Utc::now();
                let exchange = Exchange::new(
                    RequestSnapshot::new(request.method.clone(), url)
                        .with_headers(request.headers.clone()),
                    now,
                )
                .with_error(ErrorSnapshot::from(&err))
                .finished_at(now);
                self.inner.lock().state = InterceptorState::Failed;
                self.store.append(exchange);
                self.sink.failed_with_error(err.clone());
                return Err(err);
            }
        };

        let snapshot = RequestSnapshot::new(request.method.clone(), url)
            .with_headers(request.headers.clone())
            .with_body(snapshot_body(&body));

        let mut forwarded = OutboundRequest::new(request.method, request.uri)
            .with_headers(request.headers)
            .with_body(RequestBody::from(body.clone()));
        forwarded.mark_handled();

        {
            let mut inner = self.inner.lock();
            inner.request = Some(snapshot);
            inner.forwarded_body = body;
            inner.start_time = Some(Utc::now());
            inner.state = InterceptorState::Forwarding;
        }

        let delegate: Arc<dyn TaskDelegate> = self.clone();
        let handle = demux.submit(forwarded, delegate, context);

        let mut inner = self.inner.lock();
        if inner.stopped {
            handle.cancel();
        }
        inner.task = Some(handle);
        Ok(())
    }

    /// Stop the interception. The transport task is cancelled and nothing
    /// further is captured or reported.
    pub fn stop(&self) {
        let task = {
            let mut inner = self.inner.lock();
            inner.stopped = true;
            if inner.state.is_terminal() {
                return;
            }
            inner.state = InterceptorState::Cancelled;
            inner.task.clone()
        };
        if let Some(task) = task {
            debug!("Stopping interception of {}", task.id());
            task.cancel();
        }
    }

    fn is_finished(&self) -> bool {
        self.inner.lock().state.is_terminal()
    }

    /// Build the exchange for a finished task and move to `state`.
    fn finish(&self, state: InterceptorState, error: Option<&CaptureError>) -> Option<Exchange> {
        let mut inner = self.inner.lock();
        inner.state = state;
        let request = inner.request.take()?;
        let start_time = inner.start_time.unwrap_or_else(Utc::now);

        let mut exchange = Exchange::new(request, start_time).finished_at(Utc::now());
        if let Some(head) = inner.response.take() {
            exchange = exchange.with_response(ResponseSnapshot {
                status: head.status,
                headers: head.headers,
                body: std::mem::take(&mut inner.data).freeze(),
            });
        }
        if let Some(error) = error {
            exchange = exchange.with_error(ErrorSnapshot::from(error));
        }
        Some(exchange)
    }
}

impl TaskDelegate for Interceptor {
    fn will_redirect(
        &self,
        task: TaskId,
        response: ResponseHead,
        mut new_request: OutboundRequest,
        reply: Reply<Option<OutboundRequest>>,
    ) {
        let handle = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                drop(inner);
                let _ = reply.send(None);
                return;
            }
            inner.state = InterceptorState::Cancelled;
            inner.task.clone()
        };

        debug!("{} redirected ({}) to {}", task, response.status, new_request.uri);
        new_request.clear_handled();
        self.sink.was_redirected(&new_request, &response);

        if let Some(handle) = handle {
            handle.cancel();
        }
        let _ = reply.send(None);
        self.sink.failed_with_error(CaptureError::TransportCancelled);
    }

    fn need_new_body_stream(&self, _task: TaskId, reply: Reply<Option<RequestBody>>) {
        let body = self.inner.lock().forwarded_body.clone();
        let _ = reply.send(Some(RequestBody::from(body)));
    }

    fn sent_body_data(&self, task: TaskId, progress: SendProgress) {
        debug!(
            "{} sent {}/{} body bytes",
            task, progress.total_bytes_sent, progress.total_bytes_expected
        );
    }

    fn received_response(
        &self,
        _task: TaskId,
        response: ResponseHead,
        reply: Reply<ResponseDisposition>,
    ) {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                drop(inner);
                let _ = reply.send(ResponseDisposition::Allow);
                return;
            }
            inner.state = InterceptorState::Streaming;
            inner.response = Some(response.clone());
        }
        self.sink.received_response(&response);
        let _ = reply.send(ResponseDisposition::Allow);
    }

    fn received_data(&self, _task: TaskId, data: Bytes) {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.data.extend_from_slice(&data);
        }
        self.sink.received_data(&data);
    }

    fn completed(&self, task: TaskId, result: Result<(), TransportError>) {
        if self.is_finished() {
            debug!("{} completed after interception ended: {:?}", task, result);
            return;
        }

        match result {
            Ok(()) => {
                if let Some(exchange) = self.finish(InterceptorState::Completed, None) {
                    self.store.append(exchange);
                }
                self.sink.finished_loading();
            }
            Err(TransportError::Cancelled) => {
                debug!("{} cancelled, nothing captured", task);
                self.inner.lock().state = InterceptorState::Cancelled;
            }
            Err(err) => {
                let err = CaptureError::from(err);
                warn!("{} failed: {}", task, err);
                if let Some(exchange) = self.finish(InterceptorState::Failed, Some(&err)) {
                    self.store.append(exchange);
                }
                self.sink.failed_with_error(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{
        BodyStream, EventKind, EventSender, SessionEvent, TransportSession, TransportTask,
    };
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use hyper::header::LOCATION;
    use hyper::{HeaderMap, Method, StatusCode};
    use std::io::{Cursor, Write};
    use std::time::Duration;
    use tokio::sync::{oneshot, Notify};

    #[derive(Clone)]
    enum Script {
        Respond(u16, Vec<&'static str>),
        Fail(&'static str),
        Redirect(&'static str),
        Hang,
    }

    struct FakeSession {
        script: Script,
        seen_bodies: Arc<Mutex<Vec<(bool, Bytes)>>>,
    }

    struct FakeTask {
        id: TaskId,
        script: Script,
        url: String,
        events: EventSender,
        cancel: Arc<Notify>,
    }

    impl TransportSession for FakeSession {
        fn create_task(
            &self,
            id: TaskId,
            request: OutboundRequest,
            events: EventSender,
        ) -> Arc<dyn TransportTask> {
            self.seen_bodies.lock().push((
                request.is_handled(),
                request.body.as_bytes().unwrap_or_default(),
            ));
            Arc::new(FakeTask {
                id,
                script: self.script.clone(),
                url: request.url(),
                events,
                cancel: Arc::new(Notify::new()),
            })
        }
    }

    fn send(events: &EventSender, task_id: TaskId, kind: EventKind) {
        let _ = events.send(SessionEvent { task_id, kind });
    }

    fn head(status: u16, url: &str) -> ResponseHead {
        ResponseHead {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            url: url.to_string(),
        }
    }

    impl TransportTask for FakeTask {
        fn id(&self) -> TaskId {
            self.id
        }

        fn resume(&self) {
            let (id, script, url) = (self.id, self.script.clone(), self.url.clone());
            let events = self.events.clone();
            let cancel = Arc::clone(&self.cancel);
            tokio::spawn(async move {
                let run = async {
                    match script {
                        Script::Respond(status, chunks) => {
                            let (tx, rx) = oneshot::channel();
                            send(&events, id, EventKind::ReceivedResponse {
                                response: head(status, &url),
                                reply: tx,
                            });
                            let _ = rx.await;
                            for chunk in chunks {
                                send(&events, id, EventKind::ReceivedData(Bytes::from_static(chunk.as_bytes())));
                            }
                            Ok(())
                        }
                        Script::Fail(cause) => Err(TransportError::Failed(cause.to_string())),
                        Script::Redirect(location) => {
                            let mut response = head(302, &url);
                            response.headers.insert(LOCATION, location.parse().unwrap());
                            let mut next = OutboundRequest::new(Method::GET, location.parse().unwrap());
                            next.mark_handled();
                            let (tx, rx) = oneshot::channel();
                            send(&events, id, EventKind::WillRedirect {
                                response,
                                new_request: next,
                                reply: tx,
                            });
                            let _ = rx.await;
                            std::future::pending::<Result<(), TransportError>>().await
                        }
                        Script::Hang => std::future::pending().await,
                    }
                };
                let result = tokio::select! {
                    biased;
                    _ = cancel.notified() => Err(TransportError::Cancelled),
                    result = run => result,
                };
                send(&events, id, EventKind::Completed(result));
            });
        }

        fn cancel(&self) {
            self.cancel.notify_one();
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
        done: Notify,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl ClientSink for RecordingSink {
        fn received_response(&self, response: &ResponseHead) {
            self.calls.lock().push(format!("response {}", response.status.as_u16()));
        }

        fn received_data(&self, data: &Bytes) {
            self.calls.lock().push(format!("data {}", String::from_utf8_lossy(data)));
        }

        fn failed_with_error(&self, error: CaptureError) {
            self.calls.lock().push(format!("failed {}", error.kind().as_str()));
            self.done.notify_one();
        }

        fn finished_loading(&self) {
            self.calls.lock().push("finished".to_string());
            self.done.notify_one();
        }

        fn was_redirected(&self, request: &OutboundRequest, response: &ResponseHead) {
            self.calls.lock().push(format!(
                "redirected {} to {} handled={}",
                response.status.as_u16(),
                request.url(),
                request.is_handled()
            ));
        }
    }

    struct Fixture {
        store: Arc<CaptureStore>,
        sink: Arc<RecordingSink>,
        demux: Demultiplexer,
        seen_bodies: Arc<Mutex<Vec<(bool, Bytes)>>>,
        context: ExecutionContext,
    }

    fn fixture(script: Script) -> Fixture {
        let seen_bodies = Arc::new(Mutex::new(Vec::new()));
        Fixture {
            store: Arc::new(CaptureStore::default()),
            sink: Arc::new(RecordingSink::default()),
            demux: Demultiplexer::new(Arc::new(FakeSession {
                script,
                seen_bodies: Arc::clone(&seen_bodies),
            })),
            seen_bodies,
            context: ExecutionContext::spawn_serial("test-client"),
        }
    }

    impl Fixture {
        fn interceptor(&self) -> Arc<Interceptor> {
            Interceptor::new(
                Arc::clone(&self.store),
                self.sink.clone(),
                &CaptureConfig::default(),
            )
        }
    }

    fn post(url: &str, body: RequestBody) -> OutboundRequest {
        OutboundRequest::new(Method::POST, url.parse().unwrap()).with_body(body)
    }

    #[tokio::test]
    async fn test_success_is_captured_before_finish() {
        let fx = fixture(Script::Respond(200, vec!["he", "llo"]));
        let interceptor = fx.interceptor();
        interceptor
            .start(
                post("https://example.com/login", RequestBody::from(Bytes::from_static(b"{}"))),
                &fx.demux,
                fx.context.clone(),
            )
            .unwrap();

        fx.sink.done.notified().await;
        assert_eq!(
            fx.sink.calls(),
            vec!["response 200", "data he", "data llo", "finished"]
        );
        assert_eq!(interceptor.state(), InterceptorState::Completed);

        let exchange = fx.store.exchanges().remove(0);
        assert_eq!(exchange.url(), "https://example.com/login");
        assert_eq!(exchange.status_code(), 200);
        assert_eq!(exchange.response().unwrap().body.as_ref(), b"hello");
        assert_eq!(exchange.request().body.as_ref(), b"{}");

        let seen = fx.seen_bodies.lock();
        assert!(seen[0].0, "forwarded clone carries the handled marker");
    }

    #[tokio::test]
    async fn test_failure_is_captured_and_forwarded() {
        let fx = fixture(Script::Fail("connection refused"));
        let interceptor = fx.interceptor();
        interceptor
            .start(post("https://example.com/x", RequestBody::Empty), &fx.demux, fx.context.clone())
            .unwrap();

        fx.sink.done.notified().await;
        assert_eq!(fx.sink.calls(), vec!["failed transport_failed"]);
        assert_eq!(interceptor.state(), InterceptorState::Failed);

        let exchange = fx.store.exchanges().remove(0);
        assert_eq!(exchange.status_code(), 0);
        assert!(exchange.error().unwrap().message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_redirect_notifies_client_and_captures_nothing() {
        let fx = fixture(Script::Redirect("https://example.com/next"));
        let interceptor = fx.interceptor();
        interceptor
            .start(post("https://example.com/start", RequestBody::Empty), &fx.demux, fx.context.clone())
            .unwrap();

        fx.sink.done.notified().await;
        while fx.demux.active_tasks() > 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            fx.sink.calls(),
            vec![
                "redirected 302 to https://example.com/next handled=false",
                "failed cancelled"
            ]
        );
        assert_eq!(interceptor.state(), InterceptorState::Cancelled);
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_stop_swallows_cancellation() {
        let fx = fixture(Script::Hang);
        let interceptor = fx.interceptor();
        interceptor
            .start(post("https://example.com/slow", RequestBody::Empty), &fx.demux, fx.context.clone())
            .unwrap();

        interceptor.stop();
        while fx.demux.active_tasks() > 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(fx.sink.calls().is_empty());
        assert!(fx.store.is_empty());
        assert_eq!(interceptor.state(), InterceptorState::Cancelled);
    }

    #[tokio::test]
    async fn test_ineligible_request_stays_idle() {
        let fx = fixture(Script::Hang);
        let interceptor = fx.interceptor();
        let err = interceptor
            .start(
                OutboundRequest::new(Method::GET, "/relative".parse().unwrap()),
                &fx.demux,
                fx.context.clone(),
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::InterceptionIneligible(_)));
        assert_eq!(interceptor.state(), InterceptorState::Idle);
        assert_eq!(fx.demux.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_stream_body_drained_and_gzip_snapshot_decoded() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"event":"open"}"#).unwrap();
        let compressed = encoder.finish().unwrap();

        let fx = fixture(Script::Respond(204, vec![]));
        let interceptor = fx.interceptor();
        interceptor
            .start(
                post(
                    "https://example.com/events",
                    RequestBody::Stream(BodyStream::new(Cursor::new(compressed.clone()))),
                ),
                &fx.demux,
                fx.context.clone(),
            )
            .unwrap();
        fx.sink.done.notified().await;

        // Forwarded bytes are the raw drained stream; the snapshot is decoded.
        assert_eq!(fx.seen_bodies.lock()[0].1.as_ref(), compressed.as_slice());
        let exchange = fx.store.exchanges().remove(0);
        assert_eq!(
            exchange.request_body_value("event"),
            Some(serde_json::Value::String("open".into()))
        );
    }

    #[tokio::test]
    async fn test_wait_released_through_same_thread_context() {
        let fx = fixture(Script::Respond(200, vec!["ok"]));
        let since = Utc::now();
        let interceptor = fx.interceptor();
        interceptor
            .start(
                OutboundRequest::new(Method::GET, "https://example.com/ping".parse().unwrap()),
                &fx.demux,
                fx.context.clone(),
            )
            .unwrap();

        // Current-thread runtime: the append runs on this same thread while we wait.
        let found = fx
            .store
            .wait_for("ping", "GET", since, Duration::from_secs(2))
            .await;
        assert_eq!(found.unwrap().status_code(), 200);
    }
}
