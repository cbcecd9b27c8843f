//! Draftflow Orchestrator
//!
//! A [`StageSequence`] owns the canonical, ordered list of stages. Running it
//! against a [`FlowContext`] produces a [`SequenceRun`]: a lazy, pull-driven
//! cursor that executes one stage per `next()` call, threads each output into
//! the following stage's view, and stops after the first error result.
//!
//! ```text
//! context ──► [intake] ──► [outline] ──► [writer] ──► [synthesizer]
//!                │             │             │              │
//!                ▼             ▼             ▼              ▼
//!             result        result        result         result
//! ```
//!
//! Every `run()` call returns a fresh cursor; nothing is shared between runs
//! except the stages themselves.
//!
//! [`FlowContext`]: draftflow_stage::FlowContext

mod run;
mod sequence;

pub use run::SequenceRun;
pub use sequence::{StageSequence, StageSequenceBuilder, document_pipeline};
