use crate::error::CaptureError;
use crate::transport::{InterceptionHook, OutboundRequest};

/// Entry hook deciding which requests are captured.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureHook;

impl CaptureHook {
    pub const NAME: &'static str = "capture";

    /// Eligibility check: the URL needs a scheme and a host, and the request
    /// must not already carry the handled marker.
    pub fn check(request: &OutboundRequest) -> Result<(), CaptureError> {
        if request.uri.scheme().is_none() {
            return Err(CaptureError::InterceptionIneligible(format!(
                "'{}' has no scheme",
                request.uri
            )));
        }
        if request.uri.host().is_none() {
            return Err(CaptureError::InterceptionIneligible(format!(
                "'{}' has no host",
                request.uri
            )));
        }
        if request.is_handled() {
            return Err(CaptureError::InterceptionIneligible(
                "request is already handled".to_string(),
            ));
        }
        Ok(())
    }
}

impl InterceptionHook for CaptureHook {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_intercept(&self, request: &OutboundRequest) -> bool {
        Self::check(request).is_ok()
    }
}
