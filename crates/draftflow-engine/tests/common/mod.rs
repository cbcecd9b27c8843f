#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use draftflow_engine::{FlowManager, ManagerConfig};
use draftflow_orchestrator::StageSequence;
use draftflow_stage::{FlowContext, ResourceUsage, Stage, StageResult};
use serde_json::json;
use tokio::sync::{Notify, Semaphore};

/// Holds a stage inside `execute` until the test opens it.
pub struct Gate {
  entered: Notify,
  release: Semaphore,
}

impl Gate {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      entered: Notify::new(),
      release: Semaphore::new(0),
    })
  }

  /// Wait until a stage call is blocked on this gate.
  pub async fn entered(&self) {
    self.entered.notified().await;
  }

  /// Let one blocked call through.
  pub fn open(&self) {
    self.release.add_permits(1);
  }
}

enum Behavior {
  Succeed(serde_json::Value),
  Fail(String),
  /// Fail the first `n` calls, then succeed.
  FailFirst(usize, String, serde_json::Value),
  Panic,
}

pub struct TestStage {
  key: String,
  behavior: Behavior,
  gate: Option<Arc<Gate>>,
  calls: AtomicUsize,
}

impl TestStage {
  fn build(key: &str, behavior: Behavior) -> Self {
    Self {
      key: key.to_string(),
      behavior,
      gate: None,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn ok(key: &str) -> Self {
    Self::build(key, Behavior::Succeed(json!({ "text": format!("{} output", key) })))
  }

  pub fn with_output(key: &str, output: serde_json::Value) -> Self {
    Self::build(key, Behavior::Succeed(output))
  }

  pub fn failing(key: &str, message: &str) -> Self {
    Self::build(key, Behavior::Fail(message.to_string()))
  }

  pub fn failing_first(key: &str, times: usize, message: &str) -> Self {
    Self::build(
      key,
      Behavior::FailFirst(times, message.to_string(), json!({ "text": "recovered" })),
    )
  }

  pub fn panicking(key: &str) -> Self {
    Self::build(key, Behavior::Panic)
  }

  pub fn gated(mut self, gate: Arc<Gate>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Stage for TestStage {
  fn key(&self) -> &str {
    &self.key
  }

  async fn execute(&self, _context: &FlowContext) -> StageResult {
    let call = self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(gate) = &self.gate {
      gate.entered.notify_one();
      if let Ok(permit) = gate.release.acquire().await {
        permit.forget();
      }
    }

    let usage = ResourceUsage {
      provider: "test".to_string(),
      ..Default::default()
    };
    match &self.behavior {
      Behavior::Succeed(output) => StageResult::success(&self.key, output.clone(), usage),
      Behavior::Fail(message) => StageResult::failure(&self.key, message.clone(), usage),
      Behavior::FailFirst(times, message, output) => {
        if call < *times {
          StageResult::failure(&self.key, message.clone(), usage)
        } else {
          StageResult::success(&self.key, output.clone(), usage)
        }
      }
      Behavior::Panic => panic!("stage {} exploded", self.key),
    }
  }
}

pub fn sequence(stages: Vec<Arc<TestStage>>) -> StageSequence {
  let mut builder = StageSequence::builder();
  for stage in stages {
    builder = builder.stage(stage);
  }
  builder.build()
}

pub fn manager(stages: Vec<Arc<TestStage>>) -> Arc<FlowManager> {
  Arc::new(FlowManager::new(sequence(stages)))
}

pub fn manager_with(stages: Vec<Arc<TestStage>>, config: ManagerConfig) -> Arc<FlowManager> {
  Arc::new(FlowManager::with_config(sequence(stages), config))
}

pub fn context() -> FlowContext {
  FlowContext::new("Write a launch brief")
    .with_input("doc-1")
    .with_input("doc-2")
    .with_preference("style", "Formal")
}

/// Stages whose outputs feed the default final-document lookup.
pub fn document_stages() -> Vec<Arc<TestStage>> {
  vec![
    Arc::new(TestStage::ok("intake")),
    Arc::new(TestStage::with_output("writer", json!({ "document": "draft" }))),
    Arc::new(TestStage::with_output(
      "synthesizer",
      json!({ "finalDocument": "final" }),
    )),
  ]
}
