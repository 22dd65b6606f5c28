//! Transport session: the single shared client every intercepted request
//! goes through, and the events it reports per task.

mod client;
mod events;
mod hooks;
mod request;
mod session;
mod tls;

pub use client::{create_http_client, empty_body, full_body, HttpClient};
pub use events::{
    AuthChallenge, AuthDisposition, Credential, EventKind, EventSender, Reply,
    ResponseDisposition, SendProgress, SessionEvent, TaskId,
};
pub use hooks::{HeaderHook, InterceptionHook};
pub use request::{BodyStream, OutboundRequest, RequestBody, ResponseHead};
pub use session::{HyperSession, TransportSession, TransportTask};
pub use tls::AcceptAnyServerCert;
