use crate::state::{FlowState, FlowStatus};

/// Ordered chain of `(stage key, output field)` pairs searched for a
/// completed flow's final artifact. The first non-empty string wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalDocumentLookup {
  chain: Vec<(String, String)>,
}

impl Default for FinalDocumentLookup {
  fn default() -> Self {
    Self::new([("synthesizer", "finalDocument"), ("writer", "document")])
  }
}

impl FinalDocumentLookup {
  pub fn new<K, F>(chain: impl IntoIterator<Item = (K, F)>) -> Self
  where
    K: Into<String>,
    F: Into<String>,
  {
    Self {
      chain: chain
        .into_iter()
        .map(|(stage, field)| (stage.into(), field.into()))
        .collect(),
    }
  }

  pub fn chain(&self) -> &[(String, String)] {
    &self.chain
  }

  /// The final artifact of a completed flow, if any stage in the chain
  /// produced one. Always `None` for flows that did not complete.
  pub fn resolve(&self, flow: &FlowState) -> Option<String> {
    if flow.status != FlowStatus::Completed {
      return None;
    }
    self.chain.iter().find_map(|(stage, field)| {
      flow
        .results
        .iter()
        .rev()
        .find(|result| &result.stage == stage)
        .and_then(|result| result.output.as_ref())
        .and_then(|output| output.get(field))
        .and_then(|value| value.as_str())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use draftflow_stage::{FlowContext, ResourceUsage, StageResult};
  use serde_json::json;

  fn completed(results: Vec<StageResult>) -> FlowState {
    let mut flow = FlowState::new("f".to_string(), FlowContext::new("g"), results.len());
    flow.results = results;
    flow.complete();
    flow
  }

  fn ok(stage: &str, output: serde_json::Value) -> StageResult {
    StageResult::success(stage, output, ResourceUsage::default())
  }

  #[test]
  fn test_prefers_synthesized_document() {
    let flow = completed(vec![
      ok("writer", json!({"document": "draft"})),
      ok("synthesizer", json!({"finalDocument": "final"})),
    ]);
    assert_eq!(FinalDocumentLookup::default().resolve(&flow).as_deref(), Some("final"));
  }

  #[test]
  fn test_falls_back_to_written_document() {
    let flow = completed(vec![
      ok("writer", json!({"document": "draft"})),
      ok("synthesizer", json!({"notes": "no document"})),
    ]);
    assert_eq!(FinalDocumentLookup::default().resolve(&flow).as_deref(), Some("draft"));
  }

  #[test]
  fn test_none_without_candidates() {
    let flow = completed(vec![ok("intake", json!({"analysisText": "x"}))]);
    assert_eq!(FinalDocumentLookup::default().resolve(&flow), None);
  }

  #[test]
  fn test_none_for_failed_flow() {
    let mut flow = completed(vec![ok("writer", json!({"document": "draft"}))]);
    flow.fail("late failure");
    assert_eq!(FinalDocumentLookup::default().resolve(&flow), None);
  }

  #[test]
  fn test_custom_chain() {
    let flow = completed(vec![ok("summary", json!({"text": "short"}))]);
    let lookup = FinalDocumentLookup::new([("summary", "text")]);
    assert_eq!(lookup.resolve(&flow).as_deref(), Some("short"));
  }
}
