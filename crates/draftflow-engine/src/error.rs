use crate::state::{FlowAction, FlowStatus};

/// Errors returned by flow registry operations.
///
/// These describe control misuse and are returned to the direct caller only;
/// they never change a flow's recorded state.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
  #[error("flow not found: {id}")]
  NotFound { id: String },

  #[error("flow already exists: {id}")]
  AlreadyExists { id: String },

  /// Another driver is already executing this flow.
  #[error("flow {id} already has an active driver")]
  AlreadyDriving { id: String },

  #[error("flow {id} is {status} and cannot be started")]
  NotStartable { id: String, status: FlowStatus },

  #[error("cannot {action} flow {id} while it is {status}")]
  InvalidState {
    id: String,
    action: FlowAction,
    status: FlowStatus,
  },

  #[error("unknown flow action: {0}")]
  UnknownAction(String),
}
