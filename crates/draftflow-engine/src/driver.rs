use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use draftflow_orchestrator::{SequenceRun, StageSequence};
use futures::{FutureExt, Stream};
use tracing::{error, info, instrument, warn};

use crate::slot::{FlowSlot, Write};
use crate::state::{FlowState, FlowStatus};

pub(crate) const DRIVER_STOPPED: &str = "Flow driver stopped before completion";

/// The unique writer for one attempt of a flow.
///
/// Pull-driven: each call to [`FlowDriver::next`] runs exactly one stage and
/// returns the updated snapshot. Dropping the driver before the flow is
/// terminal fails the flow.
pub struct FlowDriver {
  id: String,
  token: u64,
  attempt: u32,
  slot: Arc<FlowSlot>,
  sequence: StageSequence,
  run: SequenceRun,
  done: bool,
}

impl FlowDriver {
  pub(crate) fn new(
    id: String,
    token: u64,
    attempt: u32,
    slot: Arc<FlowSlot>,
    sequence: StageSequence,
    run: SequenceRun,
  ) -> Self {
    Self {
      id,
      token,
      attempt,
      slot,
      sequence,
      run,
      done: false,
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn attempt(&self) -> u32 {
    self.attempt
  }

  /// Current state of the flow record.
  pub fn snapshot(&self) -> FlowState {
    self.slot.snapshot()
  }

  /// Run the next stage and record its result.
  ///
  /// Returns `None` once the flow is terminal, or when this driver lost
  /// ownership (cancelled or superseded by a retry).
  pub async fn next(&mut self) -> Option<FlowState> {
    if self.done {
      return None;
    }

    match AssertUnwindSafe(self.step()).catch_unwind().await {
      Ok(Some(snapshot)) => {
        if snapshot.is_terminal() {
          self.done = true;
        }
        Some(snapshot)
      }
      Ok(None) => {
        self.done = true;
        None
      }
      Err(panic) => {
        self.done = true;
        let message = format!("Flow driver fault: {}", panic_message(panic.as_ref()));
        error!(flow_id = %self.id, error = %message, "flow_failed");
        self
          .slot
          .abort_owned(self.token, &message, self.sequence.stage_keys())
      }
    }
  }

  /// Drive the flow to a terminal state and return the final snapshot.
  pub async fn run_to_completion(mut self) -> FlowState {
    while self.next().await.is_some() {}
    self.snapshot()
  }

  /// The driver as a stream of snapshots, one per executed stage.
  pub fn into_stream(self) -> impl Stream<Item = FlowState> + Send {
    futures::stream::unfold(self, |mut driver| async move {
      let snapshot = driver.next().await?;
      Some((snapshot, driver))
    })
  }

  #[instrument(name = "flow_step", skip(self), fields(flow_id = %self.id, attempt = self.attempt))]
  async fn step(&mut self) -> Option<FlowState> {
    let Some(key) = self.run.next_stage().map(str::to_string) else {
      // Only reachable for an empty sequence.
      let snapshot = self.write(&|state| state.complete()).await?;
      info!("flow_completed");
      return Some(snapshot);
    };

    self
      .write(&|state| state.current_stage = Some(key.clone()))
      .await?;
    info!(stage = %key, "stage_started");

    let result = self.run.next().await?;
    let finished = self.run.is_finished();
    let failed = result.is_error();
    let error = result.error.clone();

    let snapshot = self
      .write(&|state| {
        state.results.push(result.clone());
        state.recompute_progress();
        if failed {
          state.fail(
            result
              .error
              .clone()
              .unwrap_or_else(|| format!("Stage {} failed", result.stage)),
          );
        } else if finished {
          state.complete();
        }
      })
      .await;

    let Some(snapshot) = snapshot else {
      warn!(stage = %key, "stage result discarded");
      return None;
    };

    match snapshot.status {
      FlowStatus::Failed => {
        error!(stage = %key, error = ?error, "flow_failed");
      }
      FlowStatus::Completed => {
        info!(stage = %key, "stage_completed");
        info!(results = snapshot.results.len(), "flow_completed");
      }
      _ => {
        info!(stage = %key, progress = snapshot.progress, "stage_completed");
      }
    }
    Some(snapshot)
  }

  /// Write to the record, holding the write while the flow is paused.
  async fn write(&self, f: &(dyn Fn(&mut FlowState) + Sync)) -> Option<FlowState> {
    loop {
      match self.slot.write_running(self.token, f) {
        Write::Applied(snapshot) => return Some(snapshot),
        Write::Stale => return None,
        Write::Paused => {
          let mut updates = self.slot.subscribe();
          let resumed = updates
            .wait_for(|state| state.status != FlowStatus::Paused)
            .await
            .is_ok();
          if !resumed {
            return None;
          }
        }
      }
    }
  }
}

impl Drop for FlowDriver {
  fn drop(&mut self) {
    if let Some(snapshot) = self
      .slot
      .release(self.token, DRIVER_STOPPED, self.sequence.stage_keys())
    {
      warn!(
        flow_id = %self.id,
        attempt = self.attempt,
        results = snapshot.results.len(),
        "flow driver dropped before completion"
      );
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

#[cfg(test)]
mod tests {
  use std::fmt;

  use draftflow_orchestrator::StageSequence;
  use draftflow_stage::FlowContext;
  use tracing::field::{Field, Visit};
  use tracing::span::{Attributes, Id, Record};
  use tracing::subscriber::Interest;
  use tracing::{Event, Metadata, Subscriber};

  use super::*;
  use crate::manager::FlowManager;

  /// A log sink that blows up when a stage starts.
  struct FailingSink;

  #[derive(Default)]
  struct Message(String);

  impl Visit for Message {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
      if field.name() == "message" {
        self.0 = format!("{value:?}");
      }
    }
  }

  impl Subscriber for FailingSink {
    fn register_callsite(&self, _: &'static Metadata<'static>) -> Interest {
      Interest::sometimes()
    }

    fn enabled(&self, _: &Metadata<'_>) -> bool {
      true
    }

    fn new_span(&self, _: &Attributes<'_>) -> Id {
      Id::from_u64(1)
    }

    fn record(&self, _: &Id, _: &Record<'_>) {}

    fn record_follows_from(&self, _: &Id, _: &Id) {}

    fn event(&self, event: &Event<'_>) {
      let mut message = Message::default();
      event.record(&mut message);
      if message.0 == "stage_started" {
        panic!("log sink unavailable");
      }
    }

    fn enter(&self, _: &Id) {}

    fn exit(&self, _: &Id) {}
  }

  #[tokio::test]
  async fn test_fault_outside_stage_fails_flow() {
    let _sink = tracing::subscriber::set_default(FailingSink);
    let manager = FlowManager::new(StageSequence::builder().declare("a").declare("b").build());

    let mut driver = manager
      .start_flow(FlowContext::new("goal"), Some("f1".to_string()))
      .unwrap();
    let snapshot = driver.next().await.unwrap();

    assert_eq!(snapshot.status, FlowStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("Flow driver fault: log sink unavailable"));
    assert!(snapshot.end_time.is_some());
    assert!(snapshot.results.last().is_some_and(|r| r.is_error()));
    assert!(driver.next().await.is_none());

    drop(driver);
    assert!(!manager.has_active_driver("f1"));
    assert_eq!(manager.get_flow_state("f1").unwrap(), snapshot);
  }
}
