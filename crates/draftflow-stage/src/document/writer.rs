use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use super::{DEFAULT_MAX_TOKENS, DocumentServices, render_constraints, render_sources, source_ids};
use crate::context::FlowContext;
use crate::error::StageError;
use crate::generator::GenerationRequest;
use crate::result::StageResult;
use crate::stage::{Stage, UsageTracker};

pub(crate) const KEY: &str = "writer";

const TEMPERATURE: f32 = 0.7;
const TOKEN_ESTIMATE: u64 = 25000;

/// Writes the full document following the outline.
pub struct WriterStage {
  services: DocumentServices,
}

impl WriterStage {
  pub fn new(services: DocumentServices) -> Self {
    Self { services }
  }

  async fn run(&self, context: &FlowContext, tracker: &mut UsageTracker) -> Result<Value, StageError> {
    let outline = context
      .output_str(super::outline::KEY, "outlineText")
      .ok_or(StageError::MissingInput("No outline available"))?;
    let sources = self.services.resolve_sources(context, tracker).await?;

    let prompt = format!(
      "Write a complete document following the outline, grounded in the sources.\n\n\
       Goal: {goal}\n\
       Style: {style}\n\n\
       Outline:\n{outline}\n\n\
       Include specific facts and quotes from the sources and cite them naturally.\n\n\
       {constraints}\n{sources}",
      goal = context.goal,
      style = context.style().unwrap_or("Professional and informative"),
      constraints = render_constraints(context),
      sources = render_sources(&sources),
    );
    let request = GenerationRequest::new(prompt)
      .with_system_prompt("You are an expert writer. Write accurate, engaging, well-attributed content.")
      .with_temperature(TEMPERATURE)
      .with_max_tokens(context.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));

    let generation = self
      .services
      .generate(context, request, TOKEN_ESTIMATE, tracker)
      .await?;
    let word_count = generation.text.split_whitespace().count();

    Ok(json!({
      "document": generation.text,
      "wordCount": word_count,
      "documentsReferenced": source_ids(&sources),
    }))
  }
}

#[async_trait]
impl Stage for WriterStage {
  fn key(&self) -> &str {
    KEY
  }

  fn name(&self) -> &str {
    "Writer"
  }

  fn description(&self) -> &str {
    "Writes grounded content from the outline and the source documents"
  }

  #[instrument(name = "stage_execute", skip(self, context), fields(stage = KEY))]
  async fn execute(&self, context: &FlowContext) -> StageResult {
    let mut tracker = UsageTracker::start(self.services.provider_for(context));
    let outcome = self.run(context, &mut tracker).await;
    match &outcome {
      Ok(output) => info!(word_count = %output["wordCount"], "stage_completed"),
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
  use crate::generator::ScriptedGenerator;
  use crate::result::Outcome;

  fn with_outline(context: FlowContext) -> FlowContext {
    let mut outputs = BTreeMap::new();
    outputs.insert("outline".to_string(), json!({"outlineText": "1. Intro"}));
    context.with_outputs(outputs)
  }

  #[tokio::test]
  async fn test_writer_requires_outline() {
    let stage = WriterStage::new(testing::services(Arc::new(ScriptedGenerator::echo("m"))));
    let result = stage.execute(&FlowContext::new("brief").with_input("doc-1")).await;
    assert_eq!(result.error.as_deref(), Some("No outline available"));
  }

  #[tokio::test]
  async fn test_writer_counts_words_and_passes_budget() {
    let generator = Arc::new(ScriptedGenerator::new("m", |_| Ok("one two  three\nfour".to_string())));
    let stage = WriterStage::new(testing::services(generator.clone()));

    let context = with_outline(FlowContext::new("brief").with_input("doc-2").with_max_tokens(1000));
    let result = stage.execute(&context).await;
    assert_eq!(result.outcome, Outcome::Success);

    let output = result.output.unwrap();
    assert_eq!(output["wordCount"], 4);
    assert_eq!(output["documentsReferenced"], json!(["doc-2"]));

    let request = &generator.requests()[0];
    assert_eq!(request.max_tokens, Some(1000));
    assert_eq!(request.temperature, 0.7);
  }

  #[tokio::test]
  async fn test_writer_defaults_token_budget() {
    let generator = Arc::new(ScriptedGenerator::echo("m"));
    let stage = WriterStage::new(testing::services(generator.clone()));

    stage
      .execute(&with_outline(FlowContext::new("brief").with_input("doc-1")))
      .await;
    assert_eq!(generator.requests()[0].max_tokens, Some(4096));
  }
}
