use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Input and accumulated state threaded through a stage sequence.
///
/// A context is an immutable snapshot from a stage's point of view: the
/// orchestrator hands each stage a fresh view built from the base context
/// plus the outputs accumulated so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowContext {
  /// What the run should produce.
  pub goal: String,
  /// Content ids of the source materials, in order, without duplicates.
  #[serde(default, alias = "documentIds")]
  pub input_ids: Vec<String>,
  /// Free-form style and preference key-values.
  #[serde(default)]
  pub preferences: BTreeMap<String, String>,
  #[serde(default)]
  pub constraints: Vec<String>,
  /// Outputs of earlier stages keyed by stage key.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub stage_outputs: BTreeMap<String, serde_json::Value>,
  /// Token budget for generation calls.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_tokens: Option<u32>,
  /// Requested provider/model; stages fall back to their generator's default.
  #[serde(default, alias = "preferredModel", skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
}

impl FlowContext {
  pub fn new(goal: impl Into<String>) -> Self {
    Self {
      goal: goal.into(),
      ..Default::default()
    }
  }

  /// Add an input id, ignoring ids already present.
  pub fn with_input(mut self, id: impl Into<String>) -> Self {
    let id = id.into();
    if !self.input_ids.contains(&id) {
      self.input_ids.push(id);
    }
    self
  }

  pub fn with_preference(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.preferences.insert(key.into(), value.into());
    self
  }

  pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
    self.constraints.push(constraint.into());
    self
  }

  pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
    self.max_tokens = Some(max_tokens);
    self
  }

  pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
    self.provider = Some(provider.into());
    self
  }

  /// Drop duplicate and blank input ids, keeping first occurrences in order.
  pub fn normalized(mut self) -> Self {
    let mut seen: Vec<String> = Vec::with_capacity(self.input_ids.len());
    for id in self.input_ids.drain(..) {
      let id = id.trim().to_string();
      if !id.is_empty() && !seen.contains(&id) {
        seen.push(id);
      }
    }
    self.input_ids = seen;
    self
  }

  /// A view of this context carrying the given accumulated outputs.
  pub fn with_outputs(&self, outputs: BTreeMap<String, serde_json::Value>) -> Self {
    Self {
      stage_outputs: outputs,
      ..self.clone()
    }
  }

  /// The output recorded for an earlier stage, if any.
  pub fn output(&self, stage_key: &str) -> Option<&serde_json::Value> {
    self.stage_outputs.get(stage_key).filter(|v| !v.is_null())
  }

  /// A non-empty string field of an earlier stage's output.
  pub fn output_str(&self, stage_key: &str, field: &str) -> Option<&str> {
    self
      .output(stage_key)
      .and_then(|output| output.get(field))
      .and_then(|value| value.as_str())
      .filter(|s| !s.trim().is_empty())
  }

  pub fn style(&self) -> Option<&str> {
    self.preferences.get("style").map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_with_input_keeps_first_occurrence() {
    let context = FlowContext::new("brief")
      .with_input("a")
      .with_input("b")
      .with_input("a");
    assert_eq!(context.input_ids, vec!["a", "b"]);
  }

  #[test]
  fn test_normalized_removes_duplicates_and_blanks() {
    let context = FlowContext {
      goal: "brief".to_string(),
      input_ids: vec![
        "b".to_string(),
        " ".to_string(),
        "a".to_string(),
        "b".to_string(),
      ],
      ..Default::default()
    }
    .normalized();
    assert_eq!(context.input_ids, vec!["b", "a"]);
  }

  #[test]
  fn test_with_outputs_leaves_base_untouched() {
    let base = FlowContext::new("brief").with_input("a");
    let mut outputs = BTreeMap::new();
    outputs.insert("intake".to_string(), json!({"analysisText": "done"}));

    let view = base.with_outputs(outputs);
    assert!(base.stage_outputs.is_empty());
    assert_eq!(view.output_str("intake", "analysisText"), Some("done"));
    assert_eq!(view.input_ids, base.input_ids);
  }

  #[test]
  fn test_output_str_treats_empty_and_null_as_missing() {
    let mut outputs = BTreeMap::new();
    outputs.insert("intake".to_string(), json!({"analysisText": "  "}));
    outputs.insert("outline".to_string(), serde_json::Value::Null);
    let view = FlowContext::new("brief").with_outputs(outputs);

    assert_eq!(view.output_str("intake", "analysisText"), None);
    assert!(view.output("outline").is_none());
    assert_eq!(view.output_str("writer", "document"), None);
  }

  #[test]
  fn test_deserialize_accepts_legacy_field_names() {
    let context: FlowContext = serde_json::from_value(json!({
      "goal": "Write a brief",
      "documentIds": ["doc-1"],
      "preferredModel": "claude-4-sonnet",
      "preferences": {"style": "Formal"}
    }))
    .unwrap();

    assert_eq!(context.input_ids, vec!["doc-1"]);
    assert_eq!(context.provider.as_deref(), Some("claude-4-sonnet"));
    assert_eq!(context.style(), Some("Formal"));
  }
}
