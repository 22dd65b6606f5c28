//! Wiretap: an interception harness that captures every HTTP exchange made by
//! code under test and lets tests wait for matching exchanges.

pub mod admin_api;
pub mod capture;
pub mod config;
pub mod context;
pub mod demux;
pub mod error;
pub mod exchange;
pub mod harness;
pub mod interceptor;
pub mod metrics;
pub mod proxy;
pub mod transport;

pub use capture::CaptureStore;
pub use config::Config;
pub use context::ExecutionContext;
pub use demux::{Demultiplexer, TaskDelegate};
pub use error::{CaptureError, ErrorKind, TransportError};
pub use exchange::{Exchange, RequestSnapshot, ResponseSnapshot};
pub use harness::Harness;
pub use interceptor::{ClientSink, Interceptor, InterceptorState};
pub use proxy::CaptureProxy;
