//! The stage contract.

use std::time::Instant;

use async_trait::async_trait;

use crate::context::FlowContext;
use crate::result::{ResourceUsage, StageResult};

/// One pipeline step delegating to an external service.
///
/// Implementations must:
/// - check the context for every upstream output they depend on and return an
///   error result naming what is missing, rather than assuming their position
///   in the sequence;
/// - convert every failure of the underlying call into an error result.
#[async_trait]
pub trait Stage: Send + Sync {
  /// Declared identifier; also the key its output is accumulated under.
  fn key(&self) -> &str;

  /// Human-readable name.
  fn name(&self) -> &str {
    self.key()
  }

  fn description(&self) -> &str {
    ""
  }

  /// Execute the stage against a context snapshot.
  async fn execute(&self, context: &FlowContext) -> StageResult;
}

/// Collects resource usage while a stage runs.
#[derive(Debug)]
pub struct UsageTracker {
  started: Instant,
  provider: String,
  tokens_used: u64,
  accessed_ids: Vec<String>,
  calls: Vec<serde_json::Value>,
}

impl UsageTracker {
  /// Start timing a stage served by `provider`.
  pub fn start(provider: impl Into<String>) -> Self {
    Self {
      started: Instant::now(),
      provider: provider.into(),
      tokens_used: 0,
      accessed_ids: Vec::new(),
      calls: Vec::new(),
    }
  }

  pub fn provider(&self) -> &str {
    &self.provider
  }

  pub fn set_provider(&mut self, provider: impl Into<String>) {
    self.provider = provider.into();
  }

  /// Record a content id as accessed (once).
  pub fn record_access(&mut self, id: &str) {
    if !self.accessed_ids.iter().any(|known| known == id) {
      self.accessed_ids.push(id.to_string());
    }
  }

  pub fn record_call(&mut self, call: serde_json::Value) {
    self.calls.push(call);
  }

  pub fn add_tokens(&mut self, tokens: u64) {
    self.tokens_used = self.tokens_used.saturating_add(tokens);
  }

  pub fn accessed_ids(&self) -> &[String] {
    &self.accessed_ids
  }

  pub fn finish(self) -> ResourceUsage {
    ResourceUsage {
      tokens_used: self.tokens_used,
      elapsed_ms: self.started.elapsed().as_millis() as u64,
      provider: self.provider,
      accessed_ids: self.accessed_ids,
      calls: self.calls,
    }
  }

  /// Finish tracking and wrap the outcome of a stage body into a result.
  pub fn into_result<E: std::fmt::Display>(
    self,
    stage: &str,
    outcome: Result<serde_json::Value, E>,
  ) -> StageResult {
    match outcome {
      Ok(output) => StageResult::success(stage, output, self.finish()),
      Err(e) => StageResult::failure(stage, e.to_string(), self.finish()),
    }
  }
}
