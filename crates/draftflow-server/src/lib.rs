//! Draftflow Server
//!
//! HTTP surface over a shared [`FlowManager`]: starting flows (in the
//! background or streamed inline as SSE), subscribing to a flow by id,
//! control actions, reads, and the content store.
//!
//! [`FlowManager`]: draftflow_engine::FlowManager

mod error;
mod routes;
mod server;

pub use error::{Result, ServerError};
pub use routes::{AppState, router};
pub use server::serve;
