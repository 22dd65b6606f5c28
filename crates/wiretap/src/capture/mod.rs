//! Capture store and queries over captured exchanges.

mod query;
mod store;

pub use store::CaptureStore;
