//! Stage and generator errors.

use draftflow_content::ContentError;

/// Errors from the external generative service.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
  /// The request could not be sent or the response not read.
  #[error("generator request failed: {0}")]
  Http(#[from] reqwest::Error),

  /// The service answered with a non-success status.
  #[error("generator returned status {status}: {body}")]
  Status { status: u16, body: String },

  /// The service answered without any text.
  #[error("generator returned an empty response")]
  EmptyResponse,

  #[error("no API key configured (set {env_var})")]
  MissingApiKey { env_var: String },

  #[error("{0}")]
  Other(String),
}

/// Failures inside a stage. Stages convert these into error results; they
/// never escape [`crate::Stage::execute`].
#[derive(Debug, thiserror::Error)]
pub enum StageError {
  /// A required upstream output is absent from the context.
  #[error("{0}")]
  MissingInput(&'static str),

  #[error("No source documents available")]
  NoSources,

  #[error("content store error: {0}")]
  Content(#[from] ContentError),

  #[error(transparent)]
  Generator(#[from] GeneratorError),
}
