//! Admin REST API for tests running outside the harness process.
//!
//! - `GET /health`, `GET /metrics`
//! - `GET /exchanges` and `DELETE /exchanges`
//! - `GET /exchanges/wait?path=&method=&since=&timeoutMs=&count=`
//!
//! The API listens on a configurable port (default: 2626).

mod handlers;
mod router;
mod server;
mod types;

pub use server::{AdminApiServer, AdminState};
pub use types::{ExchangeSummary, WaitResponse};
