use crate::error::TransportError;
use crate::transport::{
    AuthChallenge, AuthDisposition, OutboundRequest, Reply, RequestBody, ResponseDisposition,
    ResponseHead, SendProgress, TaskId,
};
use bytes::Bytes;

/// Receiver of per-task session events.
///
/// Every method has a default that gives the session's default answer, so a
/// delegate only overrides what it cares about. Calls for one task arrive in
/// transport order on the execution context the task was submitted from.
pub trait TaskDelegate: Send + Sync {
    fn will_redirect(
        &self,
        _task: TaskId,
        _response: ResponseHead,
        new_request: OutboundRequest,
        reply: Reply<Option<OutboundRequest>>,
    ) {
        let _ = reply.send(Some(new_request));
    }

    fn auth_challenge(
        &self,
        _task: TaskId,
        _challenge: AuthChallenge,
        reply: Reply<AuthDisposition>,
    ) {
        let _ = reply.send(AuthDisposition::PerformDefaultHandling);
    }

    fn need_new_body_stream(&self, _task: TaskId, reply: Reply<Option<RequestBody>>) {
        let _ = reply.send(None);
    }

    fn sent_body_data(&self, _task: TaskId, _progress: SendProgress) {}

    fn received_response(
        &self,
        _task: TaskId,
        _response: ResponseHead,
        reply: Reply<ResponseDisposition>,
    ) {
        let _ = reply.send(ResponseDisposition::Allow);
    }

    fn received_data(&self, _task: TaskId, _data: Bytes) {}

    fn became_download_task(&self, _task: TaskId) {}

    fn completed(&self, _task: TaskId, _result: Result<(), TransportError>) {}
}
