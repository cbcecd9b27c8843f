use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use super::{DocumentServices, render_constraints, render_sources, source_ids};
use crate::context::FlowContext;
use crate::error::StageError;
use crate::generator::GenerationRequest;
use crate::result::StageResult;
use crate::stage::{Stage, UsageTracker};

pub(crate) const KEY: &str = "outline";

const TEMPERATURE: f32 = 0.5;
const TOKEN_ESTIMATE: u64 = 8000;

/// Turns the intake analysis into a section outline.
pub struct OutlineStage {
  services: DocumentServices,
}

impl OutlineStage {
  pub fn new(services: DocumentServices) -> Self {
    Self { services }
  }

  async fn run(&self, context: &FlowContext, tracker: &mut UsageTracker) -> Result<Value, StageError> {
    let analysis = context
      .output_str(super::intake::KEY, "analysisText")
      .ok_or(StageError::MissingInput("No intake analysis available"))?;
    let sources = self.services.resolve_sources(context, tracker).await?;

    let prompt = format!(
      "Create a detailed outline for: \"{goal}\"\n\
       Style: {style}\n\n\
       Document analysis:\n{analysis}\n\n\
       Give the document a clear hierarchy, with key points and supporting \
       sources listed under each section.\n\n\
       {constraints}\n{sources}",
      goal = context.goal,
      style = context.style().unwrap_or("Professional and informative"),
      constraints = render_constraints(context),
      sources = render_sources(&sources),
    );
    let request = GenerationRequest::new(prompt)
      .with_system_prompt("You are an expert content strategist. Produce well-organized outlines.")
      .with_temperature(TEMPERATURE);

    let generation = self
      .services
      .generate(context, request, TOKEN_ESTIMATE, tracker)
      .await?;

    Ok(json!({
      "outlineText": generation.text,
      "documentsReferenced": source_ids(&sources),
      "createdAt": Utc::now().to_rfc3339(),
    }))
  }
}

#[async_trait]
impl Stage for OutlineStage {
  fn key(&self) -> &str {
    KEY
  }

  fn name(&self) -> &str {
    "Outline"
  }

  fn description(&self) -> &str {
    "Creates a structured outline from the source analysis"
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
