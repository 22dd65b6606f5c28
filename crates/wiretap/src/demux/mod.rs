//! Demultiplexer for the shared transport session.
//!
//! Every transport task reports into one session-wide event stream. The
//! demultiplexer consumes that stream on a single dispatcher task and routes
//! each event to the delegate that submitted the task, on the execution
//! context it submitted from. Events for one task reach its delegate in the
//! order the transport produced them.

mod delegate;

pub use delegate::TaskDelegate;

use crate::config::SessionConfig;
use crate::context::ExecutionContext;
use crate::interceptor::CaptureHook;
use crate::metrics;
use crate::transport::{
    create_http_client, EventKind, EventSender, HeaderHook, HyperSession, InterceptionHook,
    OutboundRequest, SessionEvent, TaskId, TransportSession, TransportTask,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

type RoutingTable = Mutex<HashMap<TaskId, Arc<TaskContext>>>;

/// Routing entry for one in-flight task.
pub struct TaskContext {
    binding: Mutex<Option<Binding>>,
}

#[derive(Clone)]
struct Binding {
    delegate: Arc<dyn TaskDelegate>,
    context: ExecutionContext,
}

impl TaskContext {
    fn new(delegate: Arc<dyn TaskDelegate>, context: ExecutionContext) -> Self {
        Self {
            binding: Mutex::new(Some(Binding { delegate, context })),
        }
    }

    fn binding(&self) -> Option<Binding> {
        self.binding.lock().clone()
    }

    /// Drop the delegate and context references.
    fn invalidate(&self) {
        self.binding.lock().take();
    }
}

/// Handle to a submitted task.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    task: Arc<dyn TransportTask>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

pub struct Demultiplexer {
    session: Arc<dyn TransportSession>,
    routes: Arc<RoutingTable>,
    events: EventSender,
    next_id: AtomicU64,
}

impl Demultiplexer {
    /// Wrap a session and start the dispatcher on the current Tokio runtime.
    pub fn new(session: Arc<dyn TransportSession>) -> Self {
        let (events, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
        let routes: Arc<RoutingTable> = Arc::new(Mutex::new(HashMap::new()));

        let dispatch_routes = Arc::clone(&routes);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatch(&dispatch_routes, event);
            }
            debug!("Session dispatcher stopped");
        });

        Self {
            session,
            routes,
            events,
            next_id: AtomicU64::new(0),
        }
    }

    /// Build the shared hyper session from configuration.
    ///
    /// The capture hook is never installed on the session, so demultiplexed
    /// traffic is not intercepted a second time.
    pub fn from_config(
        config: &SessionConfig,
        hooks: Vec<Arc<dyn InterceptionHook>>,
    ) -> Result<Self, anyhow::Error> {
        let mut hooks: Vec<Arc<dyn InterceptionHook>> = hooks
            .into_iter()
            .filter(|hook| hook.name() != CaptureHook::NAME)
            .collect();

        let header_hook = HeaderHook::from_pairs(&config.extra_headers)?;
        if !header_hook.is_empty() {
            hooks.push(Arc::new(header_hook));
        }

        let client = create_http_client(config)?;
        let session = HyperSession::new(client, hooks, config.max_redirects);
        info!("Transport session hooks: {:?}", session.hook_names());

        Ok(Self::new(Arc::new(session)))
    }

    /// Submit a request. Events for the task are delivered to `delegate` on `context`.
    pub fn submit(
        &self,
        request: OutboundRequest,
        delegate: Arc<dyn TaskDelegate>,
        context: ExecutionContext,
    ) -> TaskHandle {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        debug!("Submitting {} {} {} on '{}'", id, request.method, request.uri, context.name());

        let task = self.session.create_task(id, request, self.events.clone());
        {
            let mut routes = self.routes.lock();
            routes.insert(id, Arc::new(TaskContext::new(delegate, context)));
            metrics::set_active_tasks(routes.len());
        }
        task.resume();

        TaskHandle { id, task }
    }

    pub fn active_tasks(&self) -> usize {
        self.routes.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn event_sender(&self) -> EventSender {
        self.events.clone()
    }
}

fn dispatch(routes: &RoutingTable, event: SessionEvent) {
    let SessionEvent { task_id, kind } = event;
    let label = kind.label();
    let completed = matches!(kind, EventKind::Completed(_));

    let task_context = if completed {
        let mut routes = routes.lock();
        let removed = routes.remove(&task_id);
        metrics::set_active_tasks(routes.len());
        removed
    } else {
        routes.lock().get(&task_id).cloned()
    };

    let Some(binding) = task_context.as_ref().and_then(|c| c.binding()) else {
        debug!("No delegate for {} ({}), applying default", task_id, label);
        metrics::record_session_event(label, false);
        kind.apply_default();
        return;
    };
    metrics::record_session_event(label, true);

    let Binding { delegate, context } = binding;
    let finished = if completed { task_context.clone() } else { None };
    let accepted = context.perform(move || {
        deliver(delegate.as_ref(), task_id, kind);
        if let Some(task_context) = finished {
            task_context.invalidate();
        }
    });

    if !accepted {
        // Dropped job: any reply inside it is dropped too and reads as the default.
        debug!("Context '{}' is closed, dropped {} for {}", context.name(), label, task_id);
        if completed {
            if let Some(task_context) = task_context {
                task_context.invalidate();
            }
        }
    }
}

fn deliver(delegate: &dyn TaskDelegate, task: TaskId, kind: EventKind) {
    match kind {
        EventKind::WillRedirect {
            response,
            new_request,
            reply,
        } => delegate.will_redirect(task, response, new_request, reply),
        EventKind::AuthChallenge { challenge, reply } => {
            delegate.auth_challenge(task, challenge, reply)
        }
        EventKind::NeedNewBodyStream { reply } => delegate.need_new_body_stream(task, reply),
        EventKind::SentBodyData(progress) => delegate.sent_body_data(task, progress),
        EventKind::ReceivedResponse { response, reply } => {
            delegate.received_response(task, response, reply)
        }
        EventKind::ReceivedData(data) => delegate.received_data(task, data),
        EventKind::BecameDownloadTask => delegate.became_download_task(task),
        EventKind::Completed(result) => delegate.completed(task, result),
    }
}
