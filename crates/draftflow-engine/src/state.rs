//! Flow records and their status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use draftflow_stage::{FlowContext, ResourceUsage, StageResult};
use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Lifecycle status of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
  Pending,
  Running,
  Paused,
  Completed,
  Failed,
}

impl FlowStatus {
  /// Completed or failed.
  pub fn is_terminal(self) -> bool {
    matches!(self, FlowStatus::Completed | FlowStatus::Failed)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      FlowStatus::Pending => "pending",
      FlowStatus::Running => "running",
      FlowStatus::Paused => "paused",
      FlowStatus::Completed => "completed",
      FlowStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for FlowStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Control operations on an existing flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowAction {
  Pause,
  Resume,
  Cancel,
  Retry,
}

impl fmt::Display for FlowAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      FlowAction::Pause => "pause",
      FlowAction::Resume => "resume",
      FlowAction::Cancel => "cancel",
      FlowAction::Retry => "retry",
    };
    f.write_str(name)
  }
}

impl FromStr for FlowAction {
  type Err = FlowError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pause" => Ok(FlowAction::Pause),
      "resume" => Ok(FlowAction::Resume),
      "cancel" => Ok(FlowAction::Cancel),
      "retry" => Ok(FlowAction::Retry),
      other => Err(FlowError::UnknownAction(other.to_string())),
    }
  }
}

/// One tracked execution of the stage sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
  pub id: String,
  pub status: FlowStatus,
  /// Executed stages over declared stages, in percent.
  pub progress: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub current_stage: Option<String>,
  /// Append-only within an attempt.
  pub results: Vec<StageResult>,
  pub context: FlowContext,
  pub start_time: DateTime<Utc>,
  #[serde(default)]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub error: Option<String>,
  /// 1 for the first run, incremented by every retry.
  pub attempt: u32,
  pub total_stages: usize,
}

impl FlowState {
  pub(crate) fn new(id: String, context: FlowContext, total_stages: usize) -> Self {
    Self {
      id,
      status: FlowStatus::Running,
      progress: 0.0,
      current_stage: None,
      results: Vec::new(),
      context,
      start_time: Utc::now(),
      end_time: None,
      error: None,
      attempt: 1,
      total_stages,
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.status.is_terminal()
  }

  /// Running, paused or pending.
  pub fn is_active(&self) -> bool {
    !self.is_terminal()
  }

  pub(crate) fn recompute_progress(&mut self) {
    self.progress = if self.total_stages == 0 {
      100.0
    } else {
      (self.results.len() as f64 / self.total_stages as f64 * 100.0).min(100.0)
    };
  }

  pub(crate) fn complete(&mut self) {
    self.status = FlowStatus::Completed;
    self.progress = 100.0;
    self.end_time = Some(Utc::now());
  }

  pub(crate) fn fail(&mut self, message: impl Into<String>) {
    self.status = FlowStatus::Failed;
    self.error = Some(message.into());
    self.end_time = Some(Utc::now());
  }

  /// Fail an unfinished flow from outside its stages, appending a synthetic
  /// error result for the next unexecuted stage so the log ends in an error.
  pub(crate) fn abort(&mut self, message: &str, declared: &[String]) {
    let stage = declared
      .get(self.results.len())
      .cloned()
      .or_else(|| self.current_stage.clone())
      .unwrap_or_else(|| "flow".to_string());
    self
      .results
      .push(StageResult::failure(stage, message, ResourceUsage::default()));
    self.fail(message);
  }

  /// Reset for a fresh attempt under the same id.
  pub(crate) fn reset_for_retry(&mut self) {
    self.status = FlowStatus::Running;
    self.progress = 0.0;
    self.current_stage = None;
    self.results.clear();
    self.start_time = Utc::now();
    self.end_time = None;
    self.error = None;
    self.attempt += 1;
  }
}

/// Flow counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStats {
  pub total: usize,
  pub pending: usize,
  pub running: usize,
  pub paused: usize,
  pub completed: usize,
  pub failed: usize,
}

impl FlowStats {
  pub(crate) fn count(&mut self, status: FlowStatus) {
    self.total += 1;
    match status {
      FlowStatus::Pending => self.pending += 1,
      FlowStatus::Running => self.running += 1,
      FlowStatus::Paused => self.paused += 1,
      FlowStatus::Completed => self.completed += 1,
      FlowStatus::Failed => self.failed += 1,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn declared() -> Vec<String> {
    vec!["a".to_string(), "b".to_string(), "c".to_string()]
  }

  #[test]
  fn test_wire_format() {
    let state = FlowState::new("f1".to_string(), FlowContext::new("goal"), 4);
    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(value["status"], "running");
    assert_eq!(value["progress"], 0.0);
    assert_eq!(value["totalStages"], 4);
    assert!(value["startTime"].is_string());
    assert!(value["endTime"].is_null());
    assert!(value.get("currentStage").is_none());
  }

  #[test]
  fn test_abort_appends_next_declared_stage() {
    let mut state = FlowState::new("f1".to_string(), FlowContext::new("goal"), 3);
    state.results.push(StageResult::success(
      "a",
      serde_json::json!({}),
      ResourceUsage::default(),
    ));
    state.recompute_progress();
    state.abort("Flow cancelled by user", &declared());

    assert_eq!(state.status, FlowStatus::Failed);
    assert_eq!(state.results.len(), 2);
    assert_eq!(state.results[1].stage, "b");
    assert!(state.results[1].is_error());
    assert_eq!(state.error.as_deref(), Some("Flow cancelled by user"));
    assert!(state.end_time.is_some());
    assert!((state.progress - 100.0 / 3.0).abs() < 1e-9);
  }

  #[test]
  fn test_reset_for_retry() {
    let mut state = FlowState::new("f1".to_string(), FlowContext::new("goal"), 3);
    state.abort("boom", &declared());
    state.reset_for_retry();

    assert_eq!(state.status, FlowStatus::Running);
    assert!(state.results.is_empty());
    assert_eq!(state.error, None);
    assert_eq!(state.end_time, None);
    assert_eq!(state.attempt, 2);
  }

  #[test]
  fn test_action_parsing() {
    assert_eq!("pause".parse::<FlowAction>().unwrap(), FlowAction::Pause);
    assert!(matches!(
      "restart".parse::<FlowAction>(),
      Err(FlowError::UnknownAction(action)) if action == "restart"
    ));
  }
}
