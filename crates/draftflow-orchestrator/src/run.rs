use std::collections::BTreeMap;

use draftflow_stage::{FlowContext, StageResult};
use futures::Stream;
use tracing::debug;

use crate::sequence::{StageSequence, execute_contained};

/// Cursor over one execution of a [`StageSequence`].
///
/// Each call to [`SequenceRun::next`] runs exactly one stage. The run ends
/// after the last declared stage or after the first error result.
pub struct SequenceRun {
  sequence: StageSequence,
  base: FlowContext,
  outputs: BTreeMap<String, serde_json::Value>,
  position: usize,
  finished: bool,
}

impl SequenceRun {
  pub(crate) fn new(sequence: StageSequence, base: FlowContext) -> Self {
    Self {
      sequence,
      base,
      outputs: BTreeMap::new(),
      position: 0,
      finished: false,
    }
  }

  /// Key of the stage the next call to [`SequenceRun::next`] will run.
  pub fn next_stage(&self) -> Option<&str> {
    if self.finished {
      return None;
    }
    self
      .sequence
      .stage_keys()
      .get(self.position)
      .map(String::as_str)
  }

  /// Number of stages executed so far.
  pub fn position(&self) -> usize {
    self.position
  }

  pub fn total(&self) -> usize {
    self.sequence.len()
  }

  pub fn is_finished(&self) -> bool {
    self.finished || self.position >= self.sequence.len()
  }

  /// Outputs accumulated so far, keyed by stage key.
  pub fn outputs(&self) -> &BTreeMap<String, serde_json::Value> {
    &self.outputs
  }

  /// Run the next stage and return its result, or `None` once the run is over.
  pub async fn next(&mut self) -> Option<StageResult> {
    let key = self.next_stage()?.to_string();
    let view = self.base.with_outputs(self.outputs.clone());

    let result = match self.sequence.stage(&key) {
      Some(stage) => execute_contained(&key, stage.as_ref(), &view).await,
      None => StageResult::not_found(&key),
    };

    self.position += 1;
    self
      .outputs
      .insert(key.clone(), result.output.clone().unwrap_or(serde_json::Value::Null));

    if result.is_error() || self.position >= self.sequence.len() {
      self.finished = true;
    }
    debug!(stage = %key, outcome = ?result.outcome, "sequence step");
    Some(result)
  }

  /// Drain the run, collecting every result.
  pub async fn collect(mut self) -> Vec<StageResult> {
    let mut results = Vec::with_capacity(self.total());
    while let Some(result) = self.next().await {
      results.push(result);
    }
    results
  }

  /// The run as a stream of results.
  pub fn into_stream(self) -> impl Stream<Item = StageResult> + Send {
    futures::stream::unfold(self, |mut run| async move {
      let result = run.next().await?;
      Some((result, run))
    })
  }
}
