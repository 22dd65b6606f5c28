//! Bridges an interceptor's client callbacks back onto the proxied HTTP response.

use crate::error::CaptureError;
use crate::interceptor::{ClientSink, Interceptor};
use crate::transport::{OutboundRequest, ResponseHead};
use bytes::Bytes;
use hyper::body::{Body, Frame};
use hyper::StatusCode;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// First thing the proxied client learns about its request.
#[derive(Debug)]
pub enum SinkHead {
    Response(ResponseHead),
    Redirect { status: StatusCode, location: String },
    Failed(CaptureError),
}

type Chunk = Result<Bytes, CaptureError>;

/// `ClientSink` writing into channels read by the proxy's response.
pub struct ChannelSink {
    head: Mutex<Option<oneshot::Sender<SinkHead>>>,
    body: Mutex<Option<mpsc::UnboundedSender<Chunk>>>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<SinkHead>, mpsc::UnboundedReceiver<Chunk>) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            head: Mutex::new(Some(head_tx)),
            body: Mutex::new(Some(body_tx)),
        });
        (sink, head_rx, body_rx)
    }

    /// Send the head if it has not gone out yet. Returns false when it already had.
    fn send_head(&self, head: SinkHead) -> bool {
        match self.head.lock().take() {
            Some(tx) => {
                let _ = tx.send(head);
                true
            }
            None => false,
        }
    }

    fn close_body(&self) {
        self.body.lock().take();
    }
}

impl ClientSink for ChannelSink {
    fn received_response(&self, response: &ResponseHead) {
        self.send_head(SinkHead::Response(response.clone()));
    }

    fn received_data(&self, data: &Bytes) {
        if let Some(body) = self.body.lock().as_ref() {
            let _ = body.send(Ok(data.clone()));
        }
    }

    fn failed_with_error(&self, error: CaptureError) {
        if !self.send_head(SinkHead::Failed(error.clone())) && error != CaptureError::TransportCancelled
        {
            if let Some(body) = self.body.lock().as_ref() {
                let _ = body.send(Err(error));
            }
        }
        self.close_body();
    }

    fn finished_loading(&self) {
        // A response without a head (e.g. a download) still needs one.
        self.send_head(SinkHead::Failed(CaptureError::TransportFailed(
            "finished without a response".to_string(),
        )));
        self.close_body();
    }

    fn was_redirected(&self, request: &OutboundRequest, response: &ResponseHead) {
        self.send_head(SinkHead::Redirect {
            status: response.status,
            location: request.url(),
        });
    }
}

/// Stops the interceptor when dropped, unless disarmed.
pub struct StopGuard(Option<Arc<Interceptor>>);

impl StopGuard {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self(Some(interceptor))
    }

    pub fn disarm(mut self) -> Option<Arc<Interceptor>> {
        self.0.take()
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(interceptor) = self.0.take() {
            interceptor.stop();
        }
    }
}

/// Streamed body of an intercepted response.
///
/// Dropping it before the last chunk (the client went away) stops the interceptor.
pub struct InterceptedBody {
    chunks: mpsc::UnboundedReceiver<Chunk>,
    interceptor: Option<Arc<Interceptor>>,
    done: bool,
}

impl InterceptedBody {
    pub fn new(chunks: mpsc::UnboundedReceiver<Chunk>, interceptor: Option<Arc<Interceptor>>) -> Self {
        Self {
            chunks,
            interceptor,
            done: false,
        }
    }
}

impl Body for InterceptedBody {
    type Data = Bytes;
    type Error = CaptureError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.chunks.poll_recv(cx) {
            Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Poll::Ready(Some(Err(err))) => {
                self.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

impl Drop for InterceptedBody {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(interceptor) = self.interceptor.take() {
            interceptor.stop();
        }
    }
}
