//! Per-flow storage cell.
//!
//! Each record lives in a `watch` channel: every write notifies push
//! subscribers, and dropping the slot (cleanup) closes their receivers. The
//! `driver` field holds the token of the one driver allowed to write stage
//! progress.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use crate::state::{FlowState, FlowStatus};

pub(crate) type FlowMap = Arc<RwLock<HashMap<String, Arc<FlowSlot>>>>;

/// Outcome of a driver write attempt.
pub(crate) enum Write {
  Applied(FlowState),
  /// The flow is paused; retry after resume.
  Paused,
  /// The driver no longer owns the flow, or the flow is already terminal.
  Stale,
}

pub(crate) struct FlowSlot {
  state: watch::Sender<FlowState>,
  driver: Mutex<Option<u64>>,
}

impl FlowSlot {
  pub(crate) fn new(state: FlowState) -> Self {
    let (state, _) = watch::channel(state);
    Self {
      state,
      driver: Mutex::new(None),
    }
  }

  pub(crate) fn snapshot(&self) -> FlowState {
    self.state.borrow().clone()
  }

  pub(crate) fn status(&self) -> FlowStatus {
    self.state.borrow().status
  }

  pub(crate) fn subscribe(&self) -> watch::Receiver<FlowState> {
    self.state.subscribe()
  }

  /// Apply `f`, notifying subscribers when it reports a change.
  pub(crate) fn modify(&self, f: impl FnOnce(&mut FlowState) -> bool) -> Option<FlowState> {
    let mut snapshot = None;
    self.state.send_if_modified(|state| {
      if f(state) {
        snapshot = Some(state.clone());
        true
      } else {
        false
      }
    });
    snapshot
  }

  /// Apply `f` on behalf of the driver holding `token`, only while the flow
  /// is running.
  pub(crate) fn write_running(&self, token: u64, f: &dyn Fn(&mut FlowState)) -> Write {
    let driver = lock(&self.driver);
    if *driver != Some(token) {
      return Write::Stale;
    }
    let mut outcome = Write::Stale;
    self.state.send_if_modified(|state| match state.status {
      FlowStatus::Running => {
        f(state);
        outcome = Write::Applied(state.clone());
        true
      }
      FlowStatus::Paused => {
        outcome = Write::Paused;
        false
      }
      _ => false,
    });
    outcome
  }

  /// Hand the slot to a new driver. Fails when another driver holds it.
  pub(crate) fn claim(&self, token: u64) -> bool {
    let mut driver = lock(&self.driver);
    if driver.is_some() {
      return false;
    }
    *driver = Some(token);
    true
  }

  /// Replace whatever driver holds the slot, after `f` accepts the current
  /// state. Returns the updated snapshot, or the rejected one.
  pub(crate) fn supersede(
    &self,
    token: u64,
    f: impl FnOnce(&mut FlowState) -> bool,
  ) -> Result<FlowState, FlowState> {
    let mut driver = lock(&self.driver);
    match self.modify(f) {
      Some(snapshot) => {
        *driver = Some(token);
        Ok(snapshot)
      }
      None => Err(self.snapshot()),
    }
  }

  /// Give up ownership. If the flow is still active it is aborted with
  /// `message`. Does nothing when `token` is not the owner.
  pub(crate) fn release(&self, token: u64, message: &str, declared: &[String]) -> Option<FlowState> {
    let mut driver = lock(&self.driver);
    if *driver != Some(token) {
      return None;
    }
    *driver = None;
    self.modify(|state| {
      if state.is_active() {
        state.abort(message, declared);
        true
      } else {
        false
      }
    })
  }

  /// Abort on behalf of the owning driver without giving up ownership.
  pub(crate) fn abort_owned(&self, token: u64, message: &str, declared: &[String]) -> Option<FlowState> {
    let driver = lock(&self.driver);
    if *driver != Some(token) {
      return None;
    }
    self.modify(|state| {
      if state.is_active() {
        state.abort(message, declared);
        true
      } else {
        false
      }
    })
  }

  pub(crate) fn has_driver(&self) -> bool {
    lock(&self.driver).is_some()
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read(flows: &FlowMap) -> RwLockReadGuard<'_, HashMap<String, Arc<FlowSlot>>> {
  flows.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write(flows: &FlowMap) -> RwLockWriteGuard<'_, HashMap<String, Arc<FlowSlot>>> {
  flows.write().unwrap_or_else(PoisonError::into_inner)
}
