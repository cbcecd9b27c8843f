use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use super::{DocumentServices, render_constraints, render_sources};
use crate::context::FlowContext;
use crate::error::StageError;
use crate::generator::GenerationRequest;
use crate::result::StageResult;
use crate::stage::{Stage, UsageTracker};

pub(crate) const KEY: &str = "intake";

const TEMPERATURE: f32 = 0.3;
const TOKEN_ESTIMATE: u64 = 5000;

/// Analyzes the source contents against the goal.
pub struct IntakeStage {
  services: DocumentServices,
}

impl IntakeStage {
  pub fn new(services: DocumentServices) -> Self {
    Self { services }
  }

  async fn run(&self, context: &FlowContext, tracker: &mut UsageTracker) -> Result<Value, StageError> {
    let sources = self.services.resolve_sources(context, tracker).await?;

    let prompt = format!(
      "Analyze the source documents below for creating: \"{goal}\"\n\n\
       For each document identify the main topics, key facts and data points, \
       notable quotes, structure, tone, and relevance to the goal.\n\n\
       {constraints}\n{sources}",
      goal = context.goal,
      constraints = render_constraints(context),
      sources = render_sources(&sources),
    );
    let request = GenerationRequest::new(prompt)
      .with_system_prompt("You are an expert document analyst. Provide structured, thorough insights.")
      .with_temperature(TEMPERATURE);

    let generation = self
      .services
      .generate(context, request, TOKEN_ESTIMATE, tracker)
      .await?;

    Ok(json!({
      "analysisText": generation.text,
      "documentsAnalyzed": sources.len(),
      "extractedAt": Utc::now().to_rfc3339(),
    }))
  }
}

#[async_trait]
impl Stage for IntakeStage {
  fn key(&self) -> &str {
    KEY
  }

  fn name(&self) -> &str {
    "Document Intake"
  }

  fn description(&self) -> &str {
    "Analyzes and extracts key information from the source documents"
  }

  #[instrument(name = "stage_execute", skip(self, context), fields(stage = KEY))]
  async fn execute(&self, context: &FlowContext) -> StageResult {
    let mut tracker = UsageTracker::start(self.services.provider_for(context));
    let outcome = self.run(context, &mut tracker).await;
    match &outcome {
      Ok(_) => info!(sources = tracker.accessed_ids().len(), "stage_completed"),
      Err(e) => error!(error = %e, "stage_failed"),
    }
    tracker.into_result(KEY, outcome)
  }
}
