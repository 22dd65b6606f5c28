//! Serial execution contexts.
//!
//! An `ExecutionContext` stands in for "the context that submitted a request".
//! Jobs enqueued on one context run one at a time, in enqueue order, on a
//! dedicated Tokio task. Delegate callbacks for a transport task are always
//! delivered through the context that submitted it.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

#[derive(Clone)]
pub struct ExecutionContext {
    name: Arc<str>,
    jobs: mpsc::UnboundedSender<Message>,
}

impl ExecutionContext {
    /// Start a serial context on the current Tokio runtime.
    pub fn spawn_serial(name: impl Into<String>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (jobs, mut rx) = mpsc::unbounded_channel::<Message>();

        let worker_name = Arc::clone(&name);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Run(job) => job(),
                    Message::Shutdown => break,
                }
            }
            rx.close();
            debug!("Execution context '{}' stopped", worker_name);
        });

        Self { name, jobs }
    }

    /// Enqueue a job. Returns false when the context has shut down, in which
    /// case the job is dropped without running.
    pub fn perform(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.jobs.send(Message::Run(Box::new(job))).is_ok()
    }

    /// Stop the context after the jobs already enqueued. Later jobs are dropped.
    pub fn shutdown(&self) {
        let _ = self.jobs.send(Message::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
