//! The document-creation stages.
//!
//! Four stages turn a set of source contents into a finished document:
//!
//! | key           | reads                  | writes                        |
//! |---------------|------------------------|-------------------------------|
//! | `intake`      | source contents        | `analysisText`                |
//! | `outline`     | `intake.analysisText`  | `outlineText`                 |
//! | `writer`      | `outline.outlineText`  | `document`, `wordCount`       |
//! | `synthesizer` | `writer.document`      | `finalDocument`               |
//!
//! Each stage resolves the context's input ids against a [`ContentStore`] and
//! calls a [`Generator`]. Lookups and generation calls are logged in the
//! result's usage.

mod intake;
mod outline;
mod synthesizer;
mod writer;

use std::sync::Arc;

use draftflow_content::{Content, ContentStore};
use serde_json::json;
use tracing::warn;

pub use intake::IntakeStage;
pub use outline::OutlineStage;
pub use synthesizer::SynthesizerStage;
pub use writer::WriterStage;

use crate::context::FlowContext;
use crate::error::StageError;
use crate::generator::{Generation, GenerationRequest, Generator};
use crate::stage::UsageTracker;

/// Declared keys of the document pipeline, in execution order.
pub const PIPELINE: [&str; 4] = [
  intake::KEY,
  outline::KEY,
  writer::KEY,
  synthesizer::KEY,
];

/// Default token budget for the long-form stages.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Collaborators shared by the document stages.
#[derive(Clone)]
pub struct DocumentServices {
  pub generator: Arc<dyn Generator>,
  pub store: Arc<dyn ContentStore>,
}

impl DocumentServices {
  pub fn new(generator: Arc<dyn Generator>, store: Arc<dyn ContentStore>) -> Self {
    Self { generator, store }
  }

  /// Provider a stage reports before any call is made.
  pub(crate) fn provider_for(&self, context: &FlowContext) -> String {
    context
      .provider
      .clone()
      .unwrap_or_else(|| self.generator.default_model().to_string())
  }

  /// Resolve the context's input ids, logging every lookup.
  ///
  /// Fails with [`StageError::NoSources`] when none resolve.
  pub(crate) async fn resolve_sources(
    &self,
    context: &FlowContext,
    tracker: &mut UsageTracker,
  ) -> Result<Vec<Content>, StageError> {
    let mut sources = Vec::with_capacity(context.input_ids.len());
    for id in &context.input_ids {
      let found = self.store.retrieve(id).await?;
      tracker.record_call(json!({
        "call": "retrieve",
        "id": id,
        "found": found.is_some(),
      }));
      if let Some(content) = found {
        tracker.record_access(&content.id);
        sources.push(content);
      }
    }

    if sources.is_empty() {
      return Err(StageError::NoSources);
    }
    Ok(sources)
  }

  /// Run one generation on the requested provider, falling back to the
  /// generator's default model if the requested one fails.
  ///
  /// Token cost is taken from the service's report, or `estimate` when the
  /// service reports none.
  pub(crate) async fn generate(
    &self,
    context: &FlowContext,
    request: GenerationRequest,
    estimate: u64,
    tracker: &mut UsageTracker,
  ) -> Result<Generation, StageError> {
    let default_model = self.generator.default_model().to_string();
    let requested = context.provider.clone().unwrap_or_else(|| default_model.clone());
    let prompt_chars = request.prompt.chars().count();

    tracker.record_call(json!({
      "call": "generate",
      "provider": requested,
      "promptChars": prompt_chars,
    }));

    let generation = match self
      .generator
      .generate(request.clone().with_model(requested.clone()))
      .await
    {
      Ok(generation) => generation,
      Err(e) if requested != default_model => {
        warn!(
          provider = %requested,
          fallback = %default_model,
          error = %e,
          "generation failed, retrying with default model"
        );
        tracker.record_call(json!({
          "call": "generate",
          "provider": default_model,
          "promptChars": prompt_chars,
        }));
        self
          .generator
          .generate(request.with_model(default_model))
          .await?
      }
      Err(e) => return Err(e.into()),
    };

    tracker.add_tokens(generation.tokens_used.unwrap_or(estimate));
    tracker.set_provider(generation.model.clone());
    Ok(generation)
  }
}

/// Render source contents as a prompt section.
pub(crate) fn render_sources(sources: &[Content]) -> String {
  let mut out = String::new();
  for content in sources {
    out.push_str(&format!("### {} ({})\n{}\n\n", content.title, content.id, content.body));
  }
  out
}

/// Render the constraint list as a prompt section, or nothing.
pub(crate) fn render_constraints(context: &FlowContext) -> String {
  if context.constraints.is_empty() {
    return String::new();
  }
  let mut out = String::from("Constraints:\n");
  for constraint in &context.constraints {
    out.push_str(&format!("- {}\n", constraint));
  }
  out
}

pub(crate) fn source_ids(sources: &[Content]) -> Vec<String> {
  sources.iter().map(|content| content.id.clone()).collect()
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::GeneratorError;
  use crate::generator::ScriptedGenerator;

  #[tokio::test]
  async fn test_resolve_sources_logs_every_lookup() {
    let services = testing::services(Arc::new(ScriptedGenerator::echo("m")));
    let context = FlowContext::new("brief")
      .with_input("doc-1")
      .with_input("missing")
      .with_input("doc-2");
    let mut tracker = UsageTracker::start("m");

    let sources = services.resolve_sources(&context, &mut tracker).await.unwrap();
    assert_eq!(source_ids(&sources), vec!["doc-1", "doc-2"]);

    let usage = tracker.finish();
    assert_eq!(usage.accessed_ids, vec!["doc-1", "doc-2"]);
    assert_eq!(usage.calls.len(), 3);
    assert_eq!(usage.calls[1], json!({"call": "retrieve", "id": "missing", "found": false}));
  }

  #[tokio::test]
  async fn test_resolve_sources_without_matches() {
    let services = testing::services(Arc::new(ScriptedGenerator::echo("m")));
    let context = FlowContext::new("brief").with_input("missing");
    let mut tracker = UsageTracker::start("m");

    let err = services
      .resolve_sources(&context, &mut tracker)
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "No source documents available");
  }

  #[tokio::test]
  async fn test_generate_falls_back_to_default_model() {
    let generator = Arc::new(ScriptedGenerator::new("default", |request| {
      match request.model.as_deref() {
        Some("default") => Ok("ok".to_string()),
        _ => Err(GeneratorError::Other("model unavailable".to_string())),
      }
    }));
    let services = testing::services(generator.clone());
    let context = FlowContext::new("brief").with_provider("exotic");
    let mut tracker = UsageTracker::start("exotic");

    let generation = services
      .generate(&context, GenerationRequest::new("prompt"), 42, &mut tracker)
      .await
      .unwrap();
    assert_eq!(generation.text, "ok");

    let usage = tracker.finish();
    assert_eq!(usage.provider, "default");
    assert_eq!(usage.tokens_used, 42);
    assert_eq!(usage.calls.len(), 2);
    assert_eq!(usage.calls[0]["provider"], "exotic");
    assert_eq!(usage.calls[1]["provider"], "default");
    assert_eq!(generator.requests().len(), 2);
  }

  #[tokio::test]
  async fn test_generate_default_failure_is_not_retried() {
    let generator = Arc::new(ScriptedGenerator::new("default", |_| {
      Err(GeneratorError::Other("service down".to_string()))
    }));
    let services = testing::services(generator.clone());
    let mut tracker = UsageTracker::start("default");

    let err = services
      .generate(&FlowContext::new("brief"), GenerationRequest::new("p"), 1, &mut tracker)
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "service down");
    assert_eq!(generator.requests().len(), 1);
  }

  #[test]
  fn test_render_constraints() {
    let context = FlowContext::new("brief").with_constraint("Under 500 words");
    assert_eq!(render_constraints(&context), "Constraints:\n- Under 500 words\n");
    assert_eq!(render_constraints(&FlowContext::new("brief")), "");
  }
}
