use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use draftflow_content::ContentError;
use draftflow_engine::FlowError;
use serde_json::json;
use tracing::error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors surfaced by HTTP handlers.
///
/// Every variant renders as `{"success": false, "error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
  #[error("{0}")]
  BadRequest(String),

  #[error(transparent)]
  Flow(#[from] FlowError),

  #[error(transparent)]
  Content(#[from] ContentError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl ServerError {
  pub fn status(&self) -> StatusCode {
    match self {
      ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ServerError::Flow(e) => match e {
        FlowError::NotFound { .. } => StatusCode::NOT_FOUND,
        FlowError::UnknownAction(_) => StatusCode::BAD_REQUEST,
        FlowError::AlreadyExists { .. }
        | FlowError::AlreadyDriving { .. }
        | FlowError::NotStartable { .. }
        | FlowError::InvalidState { .. } => StatusCode::CONFLICT,
      },
      ServerError::Content(ContentError::InvalidId(_)) => StatusCode::BAD_REQUEST,
      ServerError::Content(_) | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ServerError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(error = %self, "request failed");
    }
    (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
  }
}
