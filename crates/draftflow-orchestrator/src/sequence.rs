use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use draftflow_content::ContentStore;
use draftflow_stage::document::{
  DocumentServices, IntakeStage, OutlineStage, PIPELINE, SynthesizerStage, WriterStage,
};
use draftflow_stage::{FlowContext, Generator, ResourceUsage, Stage, StageResult};
use futures::FutureExt;
use tracing::error;

use crate::run::SequenceRun;

/// Fixed, ordered list of stages.
///
/// The order is set by declaration at build time and never changes. A key can
/// be declared without a registered implementation; running it yields a
/// synthetic error result.
#[derive(Clone)]
pub struct StageSequence {
  order: Arc<[String]>,
  stages: Arc<HashMap<String, Arc<dyn Stage>>>,
}

impl StageSequence {
  pub fn builder() -> StageSequenceBuilder {
    StageSequenceBuilder::default()
  }

  /// Start a fresh run against `context`.
  pub fn run(&self, context: FlowContext) -> SequenceRun {
    SequenceRun::new(self.clone(), context)
  }

  /// Execute one registered stage directly.
  pub async fn execute_single(&self, key: &str, context: &FlowContext) -> StageResult {
    match self.stage(key) {
      Some(stage) => execute_contained(key, stage.as_ref(), context).await,
      None => StageResult::not_found(key),
    }
  }

  /// Declared keys in execution order.
  pub fn stage_keys(&self) -> &[String] {
    &self.order
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.order.iter().any(|k| k == key)
  }

  pub(crate) fn stage(&self, key: &str) -> Option<&Arc<dyn Stage>> {
    self.stages.get(key)
  }
}

/// Builder for [`StageSequence`].
#[derive(Default)]
pub struct StageSequenceBuilder {
  order: Vec<String>,
  stages: HashMap<String, Arc<dyn Stage>>,
}

impl StageSequenceBuilder {
  /// Declare the next position. Re-declaring a key is ignored.
  pub fn declare(mut self, key: impl Into<String>) -> Self {
    let key = key.into();
    if !self.order.contains(&key) {
      self.order.push(key);
    }
    self
  }

  /// Register the implementation for a declared key (its [`Stage::key`]).
  /// A later registration for the same key replaces the earlier one.
  pub fn register(mut self, stage: Arc<dyn Stage>) -> Self {
    self.stages.insert(stage.key().to_string(), stage);
    self
  }

  /// Declare and register in one step.
  pub fn stage(self, stage: Arc<dyn Stage>) -> Self {
    let key = stage.key().to_string();
    self.declare(key).register(stage)
  }

  pub fn build(self) -> StageSequence {
    StageSequence {
      order: self.order.into(),
      stages: Arc::new(self.stages),
    }
  }
}

/// The four-stage document pipeline over the given generator and store.
pub fn document_pipeline(generator: Arc<dyn Generator>, store: Arc<dyn ContentStore>) -> StageSequence {
  let services = DocumentServices::new(generator, store);
  let mut builder = StageSequence::builder();
  for key in PIPELINE {
    builder = builder.declare(key);
  }
  builder
    .register(Arc::new(IntakeStage::new(services.clone())))
    .register(Arc::new(OutlineStage::new(services.clone())))
    .register(Arc::new(WriterStage::new(services.clone())))
    .register(Arc::new(SynthesizerStage::new(services)))
    .build()
}

/// Execute a stage, converting a panic into an error result.
pub(crate) async fn execute_contained(key: &str, stage: &dyn Stage, context: &FlowContext) -> StageResult {
  // The call itself sits inside the guarded future so a panic raised before
  // the stage hands back its future is contained too.
  match AssertUnwindSafe(async move { stage.execute(context).await })
    .catch_unwind()
    .await
  {
    Ok(result) => result,
    Err(panic) => {
      let message = panic_message(panic.as_ref());
      error!(stage = %key, panic = %message, "stage_panicked");
      StageResult::failure(
        key,
        format!("Stage {} panicked: {}", key, message),
        ResourceUsage::default(),
      )
    }
  }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
