//! The flow registry and control plane.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use draftflow_orchestrator::StageSequence;
use draftflow_stage::{FlowContext, StageResult};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::document::FinalDocumentLookup;
use crate::driver::FlowDriver;
use crate::error::FlowError;
use crate::slot::{FlowMap, FlowSlot, read, write};
use crate::state::{FlowAction, FlowState, FlowStats, FlowStatus};
use crate::subscription::{DEFAULT_POLL_INTERVAL, Subscription, SubscriptionMode};

pub(crate) const CANCELLED: &str = "Flow cancelled by user";

/// Tuning for a [`FlowManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
  /// Where the final artifact of a completed flow is looked up.
  pub final_document: FinalDocumentLookup,
  /// Interval used by [`FlowManager::subscribe_default`] in poll mode.
  pub poll_interval: Duration,
  /// Hard lifetime of every subscription.
  pub subscription_ceiling: Duration,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self {
      final_document: FinalDocumentLookup::default(),
      poll_interval: DEFAULT_POLL_INTERVAL,
      subscription_ceiling: Duration::from_secs(15 * 60),
    }
  }
}

/// Sole owner of all flow records.
///
/// Construct one per process and share it as `Arc<FlowManager>`.
pub struct FlowManager {
  sequence: StageSequence,
  flows: FlowMap,
  tokens: AtomicU64,
  config: ManagerConfig,
}

impl FlowManager {
  pub fn new(sequence: StageSequence) -> Self {
    Self::with_config(sequence, ManagerConfig::default())
  }

  pub fn with_config(sequence: StageSequence, config: ManagerConfig) -> Self {
    Self {
      sequence,
      flows: FlowMap::default(),
      tokens: AtomicU64::new(1),
      config,
    }
  }

  pub fn sequence(&self) -> &StageSequence {
    &self.sequence
  }

  pub fn config(&self) -> &ManagerConfig {
    &self.config
  }

  /// Insert a running flow with no results, before any stage executes.
  pub fn create_initial_flow_state(
    &self,
    context: FlowContext,
    id: impl Into<String>,
  ) -> Result<FlowState, FlowError> {
    let id = id.into();
    let mut flows = write(&self.flows);
    if flows.contains_key(&id) {
      return Err(FlowError::AlreadyExists { id });
    }
    let state = FlowState::new(id.clone(), context.normalized(), self.sequence.len());
    flows.insert(id, Arc::new(FlowSlot::new(state.clone())));
    Ok(state)
  }

  /// Begin driving a flow.
  ///
  /// Reuses a record created by [`FlowManager::create_initial_flow_state`]
  /// (keeping its context), otherwise creates one under `id` or a fresh UUID.
  pub fn start_flow(&self, context: FlowContext, id: Option<String>) -> Result<FlowDriver, FlowError> {
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let slot = {
      let mut flows = write(&self.flows);
      flows
        .entry(id.clone())
        .or_insert_with(|| {
          Arc::new(FlowSlot::new(FlowState::new(
            id.clone(),
            context.normalized(),
            self.sequence.len(),
          )))
        })
        .clone()
    };

    let status = slot.status();
    if status.is_terminal() {
      return Err(FlowError::NotStartable { id, status });
    }

    let token = self.next_token();
    if !slot.claim(token) {
      return Err(FlowError::AlreadyDriving { id });
    }

    let state = slot.snapshot();
    info!(flow_id = %id, goal = %state.context.goal, inputs = state.context.input_ids.len(), "flow_started");
    let run = self.sequence.run(state.context.clone());
    Ok(FlowDriver::new(
      id,
      token,
      state.attempt,
      slot,
      self.sequence.clone(),
      run,
    ))
  }

  /// Start a flow and drive it on a background task. Returns the initial
  /// snapshot.
  pub fn spawn_flow(&self, context: FlowContext, id: Option<String>) -> Result<FlowState, FlowError> {
    let driver = self.start_flow(context, id)?;
    let snapshot = driver.snapshot();
    tokio::spawn(driver.run_to_completion());
    Ok(snapshot)
  }

  pub fn pause_flow(&self, id: &str) -> bool {
    self.transition(id, FlowStatus::Running, FlowStatus::Paused)
  }

  pub fn resume_flow(&self, id: &str) -> bool {
    self.transition(id, FlowStatus::Paused, FlowStatus::Running)
  }

  /// Fail a running or paused flow. A stage already in flight finishes, but
  /// its result is discarded.
  pub fn cancel_flow(&self, id: &str) -> bool {
    let Some(slot) = self.slot(id) else {
      return false;
    };
    let declared = self.sequence.stage_keys();
    let cancelled = slot
      .modify(|state| {
        if state.is_active() {
          state.abort(CANCELLED, declared);
          true
        } else {
          false
        }
      })
      .is_some();
    if cancelled {
      info!(flow_id = %id, "flow_cancelled");
    }
    cancelled
  }

  /// Start a fresh attempt of a failed flow under the same id, with the
  /// original context. Any older driver can no longer write.
  #[instrument(name = "flow_retry", skip(self))]
  pub fn retry_flow(&self, id: &str) -> Result<FlowDriver, FlowError> {
    let token = self.next_token();

    // Reset while the map is read-locked so a cleanup sweep cannot remove
    // the failed record between lookup and reset.
    let (slot, state) = {
      let flows = read(&self.flows);
      let slot = flows
        .get(id)
        .cloned()
        .ok_or_else(|| FlowError::NotFound { id: id.to_string() })?;
      let state = slot
        .supersede(token, |state| {
          if state.status == FlowStatus::Failed {
            state.reset_for_retry();
            true
          } else {
            false
          }
        })
        .map_err(|state| FlowError::InvalidState {
          id: id.to_string(),
          action: FlowAction::Retry,
          status: state.status,
        })?;
      (slot, state)
    };

    info!(attempt = state.attempt, "flow_retried");
    let run = self.sequence.run(state.context.clone());
    Ok(FlowDriver::new(
      id.to_string(),
      token,
      state.attempt,
      slot,
      self.sequence.clone(),
      run,
    ))
  }

  /// Apply a control action and return the resulting snapshot. A retried
  /// flow is driven on a background task.
  pub fn control(&self, id: &str, action: FlowAction) -> Result<FlowState, FlowError> {
    let slot = self.slot(id).ok_or_else(|| FlowError::NotFound { id: id.to_string() })?;

    let applied = match action {
      FlowAction::Pause => self.pause_flow(id),
      FlowAction::Resume => self.resume_flow(id),
      FlowAction::Cancel => self.cancel_flow(id),
      FlowAction::Retry => {
        let driver = self.retry_flow(id)?;
        let snapshot = driver.snapshot();
        tokio::spawn(driver.run_to_completion());
        return Ok(snapshot);
      }
    };

    if applied {
      Ok(slot.snapshot())
    } else {
      Err(FlowError::InvalidState {
        id: id.to_string(),
        action,
        status: slot.status(),
      })
    }
  }

  pub fn get_flow_state(&self, id: &str) -> Option<FlowState> {
    self.slot(id).map(|slot| slot.snapshot())
  }

  /// All flows, oldest first.
  pub fn get_all_flows(&self) -> Vec<FlowState> {
    let mut flows: Vec<FlowState> = read(&self.flows)
      .values()
      .map(|slot| slot.snapshot())
      .collect();
    flows.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
    flows
  }

  /// Results of a flow; empty for unknown ids.
  pub fn get_flow_results(&self, id: &str) -> Vec<StageResult> {
    self
      .get_flow_state(id)
      .map(|state| state.results)
      .unwrap_or_default()
  }

  /// Whether a driver currently owns the flow.
  pub fn has_active_driver(&self, id: &str) -> bool {
    self.slot(id).is_some_and(|slot| slot.has_driver())
  }

  pub fn get_flow_stats(&self) -> FlowStats {
    let mut stats = FlowStats::default();
    for slot in read(&self.flows).values() {
      stats.count(slot.status());
    }
    stats
  }

  /// The final artifact of a completed flow.
  pub fn get_final_document(&self, id: &str) -> Option<String> {
    self
      .get_flow_state(id)
      .and_then(|state| self.config.final_document.resolve(&state))
  }

  /// Remove terminal flows whose end time is at least `max_age` ago. Flows
  /// without an end time are never removed.
  pub fn cleanup_old_flows(&self, max_age: Duration) -> usize {
    let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
    let now = Utc::now();

    let mut flows = write(&self.flows);
    let before = flows.len();
    flows.retain(|_, slot| {
      let state = slot.snapshot();
      match state.end_time {
        Some(end) if state.is_terminal() => now.signed_duration_since(end) < max_age,
        _ => true,
      }
    });
    let removed = before - flows.len();
    if removed > 0 {
      info!(removed, remaining = flows.len(), "flows_cleaned");
    }
    removed
  }

  /// Run [`FlowManager::cleanup_old_flows`] every `interval` until `cancel`
  /// fires.
  pub fn spawn_cleanup_sweep(
    self: &Arc<Self>,
    interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
  ) -> JoinHandle<()> {
    let manager = Arc::clone(self);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately.
      ticker.tick().await;

      loop {
        tokio::select! {
          _ = cancel.cancelled() => {
            info!("cleanup sweep stopped");
            break;
          }
          _ = ticker.tick() => {
            manager.cleanup_old_flows(max_age);
          }
        }
      }
    })
  }

  /// Observe a flow by id. Fails immediately for unknown ids.
  pub fn subscribe(&self, id: &str, mode: SubscriptionMode) -> Result<Subscription, FlowError> {
    let slot = self.slot(id).ok_or_else(|| FlowError::NotFound { id: id.to_string() })?;
    let lookup = self.config.final_document.clone();
    let ceiling = self.config.subscription_ceiling;

    Ok(match mode {
      SubscriptionMode::Push => Subscription::push(id.to_string(), slot.subscribe(), lookup, ceiling),
      SubscriptionMode::Poll { interval } => {
        Subscription::poll(id.to_string(), self.flows.clone(), interval, lookup, ceiling)
      }
    })
  }

  /// Subscribe in push mode, or poll mode at the configured interval.
  pub fn subscribe_default(&self, id: &str, poll: bool) -> Result<Subscription, FlowError> {
    let mode = if poll {
      SubscriptionMode::Poll {
        interval: self.config.poll_interval,
      }
    } else {
      SubscriptionMode::Push
    };
    self.subscribe(id, mode)
  }

  fn transition(&self, id: &str, from: FlowStatus, to: FlowStatus) -> bool {
    let Some(slot) = self.slot(id) else {
      warn!(flow_id = %id, to = %to, "transition on unknown flow");
      return false;
    };
    let changed = slot
      .modify(|state| {
        if state.status == from {
          state.status = to;
          true
        } else {
          false
        }
      })
      .is_some();
    if changed {
      info!(flow_id = %id, from = %from, to = %to, "flow_transition");
    }
    changed
  }

  fn slot(&self, id: &str) -> Option<Arc<FlowSlot>> {
    read(&self.flows).get(id).cloned()
  }

  fn next_token(&self) -> u64 {
    self.tokens.fetch_add(1, Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn manager() -> FlowManager {
    FlowManager::new(StageSequence::builder().declare("a").declare("b").build())
  }

  #[test]
  fn test_create_initial_flow_state() {
    let manager = manager();
    assert!(manager.get_flow_state("f1").is_none());

    let state = manager
      .create_initial_flow_state(FlowContext::new("goal").with_input("doc"), "f1")
      .unwrap();
    assert_eq!(state.status, FlowStatus::Running);
    assert!(state.results.is_empty());
    assert_eq!(state.total_stages, 2);
    assert_eq!(manager.get_flow_state("f1").unwrap(), state);

    assert!(matches!(
      manager.create_initial_flow_state(FlowContext::new("goal"), "f1"),
      Err(FlowError::AlreadyExists { .. })
    ));
  }

  #[test]
  fn test_pause_twice() {
    let manager = manager();
    manager
      .create_initial_flow_state(FlowContext::new("goal"), "f1")
      .unwrap();

    assert!(manager.pause_flow("f1"));
    assert!(!manager.pause_flow("f1"));
    assert_eq!(manager.get_flow_state("f1").unwrap().status, FlowStatus::Paused);

    assert!(manager.resume_flow("f1"));
    assert!(!manager.resume_flow("f1"));
    assert_eq!(manager.get_flow_state("f1").unwrap().status, FlowStatus::Running);
  }

  #[test]
  fn test_controls_on_unknown_flow() {
    let manager = manager();
    assert!(!manager.pause_flow("nope"));
    assert!(!manager.resume_flow("nope"));
    assert!(!manager.cancel_flow("nope"));
    assert!(manager.get_flow_results("nope").is_empty());
    assert!(matches!(manager.retry_flow("nope"), Err(FlowError::NotFound { .. })));
    assert!(matches!(
      manager.control("nope", FlowAction::Pause),
      Err(FlowError::NotFound { .. })
    ));
  }

  #[test]
  fn test_retry_requires_failed_flow() {
    let manager = manager();
    manager
      .create_initial_flow_state(FlowContext::new("goal"), "f1")
      .unwrap();
    assert!(matches!(
      manager.retry_flow("f1"),
      Err(FlowError::InvalidState {
        action: FlowAction::Retry,
        status: FlowStatus::Running,
        ..
      })
    ));
  }

  #[test]
  fn test_retry_never_drives_a_removed_flow() {
    let manager = manager();
    for round in 0..200 {
      let id = format!("f{round}");
      manager
        .create_initial_flow_state(FlowContext::new("goal"), id.as_str())
        .unwrap();
      manager.cancel_flow(&id);

      let driver = std::thread::scope(|scope| {
        let sweep = scope.spawn(|| manager.cleanup_old_flows(Duration::ZERO));
        let driver = manager.retry_flow(&id);
        let _ = sweep.join();
        driver
      });

      match driver {
        Ok(driver) => {
          let state = manager.get_flow_state(&id).unwrap();
          assert_eq!(state.status, FlowStatus::Running);
          assert_eq!(state.attempt, driver.attempt());
          manager.cleanup_old_flows(Duration::ZERO);
          assert!(manager.get_flow_state(&id).is_some());
        }
        Err(err) => {
          assert!(matches!(err, FlowError::NotFound { .. }));
          assert!(manager.get_flow_state(&id).is_none());
        }
      }
    }
  }

  #[test]
  fn test_cancel_marks_failed_with_synthetic_result() {
    let manager = manager();
    manager
      .create_initial_flow_state(FlowContext::new("goal"), "f1")
      .unwrap();
    manager.pause_flow("f1");

    assert!(manager.cancel_flow("f1"));
    assert!(!manager.cancel_flow("f1"));

    let state = manager.get_flow_state("f1").unwrap();
    assert_eq!(state.status, FlowStatus::Failed);
    assert_eq!(state.error.as_deref(), Some(CANCELLED));
    assert_eq!(state.results.len(), 1);
    assert_eq!(state.results[0].stage, "a");
    assert!(state.end_time.is_some());
  }

  #[test]
  fn test_stats() {
    let manager = manager();
    manager.create_initial_flow_state(FlowContext::new("g"), "a").unwrap();
    manager.create_initial_flow_state(FlowContext::new("g"), "b").unwrap();
    manager.create_initial_flow_state(FlowContext::new("g"), "c").unwrap();
    manager.pause_flow("b");
    manager.cancel_flow("c");

    let stats = manager.get_flow_stats();
    assert_eq!(
      stats,
      FlowStats {
        total: 3,
        running: 1,
        paused: 1,
        failed: 1,
        ..Default::default()
      }
    );
  }

  #[test]
  fn test_control_reports_invalid_state() {
    let manager = manager();
    manager
      .create_initial_flow_state(FlowContext::new("goal"), "f1")
      .unwrap();

    let state = manager.control("f1", FlowAction::Pause).unwrap();
    assert_eq!(state.status, FlowStatus::Paused);
    assert!(matches!(
      manager.control("f1", FlowAction::Pause),
      Err(FlowError::InvalidState {
        status: FlowStatus::Paused,
        ..
      })
    ));
  }
}
