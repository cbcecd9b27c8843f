use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use super::{DEFAULT_MAX_TOKENS, DocumentServices, render_sources, source_ids};
use crate::context::FlowContext;
use crate::error::StageError;
use crate::generator::GenerationRequest;
use crate::result::StageResult;
use crate::stage::{Stage, UsageTracker};

pub(crate) const KEY: &str = "synthesizer";

const TEMPERATURE: f32 = 0.3;
const TOKEN_ESTIMATE: u64 = 30000;

/// Reviews the written document against the sources and polishes it.
pub struct SynthesizerStage {
  services: DocumentServices,
}

impl SynthesizerStage {
  pub fn new(services: DocumentServices) -> Self {
    Self { services }
  }

  async fn run(&self, context: &FlowContext, tracker: &mut UsageTracker) -> Result<Value, StageError> {
    let document = context
      .output_str(super::writer::KEY, "document")
      .ok_or(StageError::MissingInput("No written content available"))?;
    let sources = self.services.resolve_sources(context, tracker).await?;

    let prompt = format!(
      "Review and polish the document below.\n\n\
       Goal: {goal}\n\
       Style: {style}\n\n\
       Document:\n{document}\n\n\
       Fact-check it against the sources, fix inconsistencies, tighten the \
       prose, and return only the final document.\n\n\
       {sources}",
      goal = context.goal,
      style = context.style().unwrap_or("Professional and informative"),
      sources = render_sources(&sources),
    );
    let request = GenerationRequest::new(prompt)
      .with_system_prompt("You are an expert editor. Return a polished, publication-ready document.")
      .with_temperature(TEMPERATURE)
      .with_max_tokens(context.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));

    let generation = self
      .services
      .generate(context, request, TOKEN_ESTIMATE, tracker)
      .await?;

    Ok(json!({
      "finalDocument": generation.text,
      "documentsReferenced": source_ids(&sources),
    }))
  }
}

#[async_trait]
impl Stage for SynthesizerStage {
  fn key(&self) -> &str {
    KEY
  }

  fn name(&self) -> &str {
    "Synthesizer"
  }

  fn description(&self) -> &str {
    "Fact-checks and polishes the written document"
  }

  #[instrument(name = "stage_execute", skip(self, context), fields(stage = KEY))]
  async fn execute(&self, context: &FlowContext) -> StageResult {
    let mut tracker = UsageTracker::start(self.services.provider_for(context));
    let outcome = self.run(context, &mut tracker).await;
    match &outcome {
      Ok(_) => info!("stage_completed"),
      Err(e) => error!(error = %e, "stage_failed"),
    }
    tracker.into_result(KEY, outcome)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;
  use std::sync::Arc;

  use super::*;
  use crate::document::testing;
  use crate::error::GeneratorError;
  use crate::generator::ScriptedGenerator;
  use crate::result::Outcome;

  #[tokio::test]
  async fn test_synthesizer_requires_written_document() {
    let stage = SynthesizerStage::new(testing::services(Arc::new(ScriptedGenerator::echo("m"))));

    let mut outputs = BTreeMap::new();
    outputs.insert("writer".to_string(), json!({"document": ""}));
    let context = FlowContext::new("brief").with_input("doc-1").with_outputs(outputs);

    let result = stage.execute(&context).await;
    assert_eq!(result.error.as_deref(), Some("No written content available"));
  }

  #[tokio::test]
  async fn test_generator_failure_becomes_error_result() {
    let generator = Arc::new(ScriptedGenerator::new("m", |_| {
      Err(GeneratorError::Status {
        status: 503,
        body: "overloaded".to_string(),
      })
    }));
    let stage = SynthesizerStage::new(testing::services(generator));

    let mut outputs = BTreeMap::new();
    outputs.insert("writer".to_string(), json!({"document": "Draft"}));
    let context = FlowContext::new("brief").with_input("doc-1").with_outputs(outputs);

    let result = stage.execute(&context).await;
    assert_eq!(result.outcome, Outcome::Error);
    assert_eq!(
      result.error.as_deref(),
      Some("generator returned status 503: overloaded")
    );
    assert_eq!(result.usage.accessed_ids, vec!["doc-1"]);
  }
}
