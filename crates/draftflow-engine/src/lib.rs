//! Draftflow Engine
//!
//! This crate tracks flows: executions of a [`StageSequence`] against one
//! context. The [`FlowManager`] is the sole owner of every flow record and
//! exposes the control plane (pause, resume, cancel, retry) and the reads.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        FlowManager                          │
//! │  - id → FlowSlot map (each record is a watch cell)          │
//! │  - start_flow / retry_flow hand out a FlowDriver            │
//! │  - pause / resume / cancel write the record directly        │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │        FlowDriver         │   │        Subscription         │
//! │  - one stage per next()   │   │  - push: woken per write    │
//! │  - fenced by its token    │   │  - poll: re-reads by id     │
//! │  - fails flow on drop     │   │  - state/completed/deleted  │
//! └───────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! At most one driver writes to a flow: a second `start_flow` is refused
//! while a driver is active, and a retry supersedes any older driver, whose
//! writes are then discarded.
//!
//! # Usage
//!
//! ```ignore
//! let manager = Arc::new(FlowManager::new(document_pipeline(generator, store)));
//!
//! // Inline: the caller drives and sees every snapshot.
//! let driver = manager.start_flow(context, None)?;
//! let id = driver.id().to_string();
//! let final_state = driver.run_to_completion().await;
//!
//! // Independent: observe by id from anywhere.
//! let mut events = manager.subscribe(&id, SubscriptionMode::Push)?;
//! while let Some(event) = events.next().await { /* ... */ }
//! ```
//!
//! [`StageSequence`]: draftflow_orchestrator::StageSequence

mod document;
mod driver;
mod error;
mod manager;
mod slot;
mod state;
mod subscription;

pub use document::FinalDocumentLookup;
pub use driver::FlowDriver;
pub use error::FlowError;
pub use manager::{FlowManager, ManagerConfig};
pub use state::{FlowAction, FlowState, FlowStats, FlowStatus};
pub use subscription::{DEFAULT_POLL_INTERVAL, FlowEvent, Subscription, SubscriptionMode};
