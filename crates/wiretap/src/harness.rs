//! Bootstrap tying the capture store to the shared session.

use crate::capture::CaptureStore;
use crate::config::{CaptureConfig, SessionConfig};
use crate::context::ExecutionContext;
use crate::demux::Demultiplexer;
use crate::error::CaptureError;
use crate::interceptor::{CaptureHook, ClientSink, Interceptor};
use crate::transport::{InterceptionHook, OutboundRequest, TransportSession};
use std::sync::Arc;

/// One capture store and one demultiplexed session, shared by every interceptor.
///
/// Tests construct a harness once and call `store().reset()` between cases.
pub struct Harness {
    store: Arc<CaptureStore>,
    demux: Arc<Demultiplexer>,
    capture: CaptureConfig,
}

impl Harness {
    /// Build the hyper-backed session. Must be called within a Tokio runtime.
    pub fn new(capture: &CaptureConfig, session: &SessionConfig) -> Result<Self, anyhow::Error> {
        let hooks: Vec<Arc<dyn InterceptionHook>> = vec![Arc::new(CaptureHook)];
        let demux = Demultiplexer::from_config(session, hooks)?;
        Ok(Self::from_parts(capture, demux))
    }

    /// Use a custom transport session.
    pub fn with_session(capture: &CaptureConfig, session: Arc<dyn TransportSession>) -> Self {
        Self::from_parts(capture, Demultiplexer::new(session))
    }

    fn from_parts(capture: &CaptureConfig, demux: Demultiplexer) -> Self {
        Self {
            store: Arc::new(CaptureStore::from_config(capture)),
            demux: Arc::new(demux),
            capture: capture.clone(),
        }
    }

    pub fn store(&self) -> &Arc<CaptureStore> {
        &self.store
    }

    pub fn demux(&self) -> &Arc<Demultiplexer> {
        &self.demux
    }

    pub fn capture_config(&self) -> &CaptureConfig {
        &self.capture
    }

    /// Intercept `request`, reporting its outcome to `sink` on `context`.
    pub fn intercept(
        &self,
        request: OutboundRequest,
        sink: Arc<dyn ClientSink>,
        context: ExecutionContext,
    ) -> Result<Arc<Interceptor>, CaptureError> {
        let interceptor = Interceptor::new(Arc::clone(&self.store), sink, &self.capture);
        interceptor.start(request, &self.demux, context)?;
        Ok(interceptor)
    }
}
