//! Stage result types.

use serde::{Deserialize, Serialize};

/// How a stage execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
  Success,
  Error,
  Partial,
}

/// Resources a stage consumed while executing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
  /// Generation cost in tokens (reported or estimated).
  pub tokens_used: u64,
  pub elapsed_ms: u64,
  /// Provider/model that served the stage.
  pub provider: String,
  /// Content ids resolved during the stage.
  pub accessed_ids: Vec<String>,
  /// Log of external sub-calls, as plain JSON entries.
  pub calls: Vec<serde_json::Value>,
}

/// Result of one stage execution. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
  /// Key of the declared stage that produced this result.
  pub stage: String,
  pub output: Option<serde_json::Value>,
  pub usage: ResourceUsage,
  pub outcome: Outcome,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StageResult {
  pub fn success(stage: impl Into<String>, output: serde_json::Value, usage: ResourceUsage) -> Self {
    Self {
      stage: stage.into(),
      output: Some(output),
      usage,
      outcome: Outcome::Success,
      error: None,
    }
  }

  /// Usable output, with a note on what is missing.
  pub fn partial(
    stage: impl Into<String>,
    output: serde_json::Value,
    usage: ResourceUsage,
    note: impl Into<String>,
  ) -> Self {
    Self {
      stage: stage.into(),
      output: Some(output),
      usage,
      outcome: Outcome::Partial,
      error: Some(note.into()),
    }
  }

  pub fn failure(stage: impl Into<String>, error: impl Into<String>, usage: ResourceUsage) -> Self {
    Self {
      stage: stage.into(),
      output: None,
      usage,
      outcome: Outcome::Error,
      error: Some(error.into()),
    }
  }

  /// Synthetic result for a stage that is declared but has no implementation.
  pub fn not_found(stage: &str) -> Self {
    Self::failure(stage, format!("Stage {} not found", stage), ResourceUsage::default())
  }

  pub fn is_error(&self) -> bool {
    self.outcome == Outcome::Error
  }
}
