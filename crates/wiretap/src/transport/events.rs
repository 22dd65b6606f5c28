//! Session-level events emitted by transport tasks.

use super::request::{OutboundRequest, RequestBody, ResponseHead};
use crate::error::TransportError;
use bytes::Bytes;
use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// Identifier of one transport task within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Answer channel for events that need a decision.
///
/// A reply dropped without an answer means "default behaviour".
pub type Reply<T> = oneshot::Sender<T>;

/// Sending half of the session's single event stream.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Authentication challenge raised by a 401 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Authentication scheme, e.g. `Basic`.
    pub scheme: String,
    pub realm: Option<String>,
    pub host: String,
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` header value.
    pub fn parse(header: &str, host: &str) -> Self {
        let header = header.trim();
        let (scheme, params) = match header.split_once(' ') {
            Some((scheme, params)) => (scheme, params),
            None => (header, ""),
        };
        let realm = params.split(',').find_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("realm")
                .then(|| value.trim().trim_matches('"').to_string())
        });
        Self {
            scheme: scheme.to_string(),
            realm,
            host: host.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthDisposition {
    UseCredential(Credential),
    #[default]
    PerformDefaultHandling,
    RejectProtectionSpace,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseDisposition {
    #[default]
    Allow,
    Cancel,
    BecomeDownload,
}

/// Upload progress for a task's request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendProgress {
    pub bytes_sent: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_expected: u64,
}

/// One event for one task.
#[derive(Debug)]
pub struct SessionEvent {
    pub task_id: TaskId,
    pub kind: EventKind,
}

#[derive(Debug)]
pub enum EventKind {
    WillRedirect {
        response: ResponseHead,
        new_request: OutboundRequest,
        reply: Reply<Option<OutboundRequest>>,
    },
    AuthChallenge {
        challenge: AuthChallenge,
        reply: Reply<AuthDisposition>,
    },
    NeedNewBodyStream {
        reply: Reply<Option<RequestBody>>,
    },
    SentBodyData(SendProgress),
    ReceivedResponse {
        response: ResponseHead,
        reply: Reply<ResponseDisposition>,
    },
    ReceivedData(Bytes),
    BecameDownloadTask,
    Completed(Result<(), TransportError>),
}

impl EventKind {
    /// Stable label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::WillRedirect { .. } => "will_redirect",
            EventKind::AuthChallenge { .. } => "auth_challenge",
            EventKind::NeedNewBodyStream { .. } => "need_new_body_stream",
            EventKind::SentBodyData(_) => "sent_body_data",
            EventKind::ReceivedResponse { .. } => "received_response",
            EventKind::ReceivedData(_) => "received_data",
            EventKind::BecameDownloadTask => "became_download_task",
            EventKind::Completed(_) => "completed",
        }
    }

    /// Answer the event with the default behaviour, without any delegate.
    pub fn apply_default(self) {
        match self {
            EventKind::WillRedirect {
                new_request, reply, ..
            } => {
                let _ = reply.send(Some(new_request));
            }
            EventKind::AuthChallenge { reply, .. } => {
                let _ = reply.send(AuthDisposition::PerformDefaultHandling);
            }
            EventKind::NeedNewBodyStream { reply } => {
                let _ = reply.send(None);
            }
            EventKind::ReceivedResponse { reply, .. } => {
                let _ = reply.send(ResponseDisposition::Allow);
            }
            EventKind::SentBodyData(_)
            | EventKind::ReceivedData(_)
            | EventKind::BecameDownloadTask
            | EventKind::Completed(_) => {}
        }
    }
}
