//! Draftflow Stage
//!
//! This crate defines the contract every pipeline step implements and the
//! data threaded through a run:
//!
//! - [`FlowContext`]: goal, input content ids, preferences, constraints and
//!   the accumulated outputs of earlier stages
//! - [`StageResult`]: what one stage execution produced, with its resource
//!   usage and outcome
//! - [`Stage`]: `execute(context) -> StageResult`, never failing past its
//!   own boundary
//!
//! It also provides the [`Generator`] contract for the external generative
//! service, an HTTP implementation, and the four document-creation stages in
//! [`document`].

mod context;
pub mod document;
mod error;
mod generator;
mod http;
mod result;
mod stage;

pub use context::FlowContext;
pub use error::{GeneratorError, StageError};
pub use generator::{Generation, GenerationRequest, Generator, ScriptedGenerator};
pub use http::HttpGenerator;
pub use result::{Outcome, ResourceUsage, StageResult};
pub use stage::{Stage, UsageTracker};
