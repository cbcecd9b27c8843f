//! Independent observation of a flow by id.

use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, warn};

use crate::document::FinalDocumentLookup;
use crate::slot::{FlowMap, read};
use crate::state::FlowState;

/// Default re-read interval for [`SubscriptionMode::Poll`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How a subscription learns about changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionMode {
  /// Woken by every write to the record.
  #[default]
  Push,
  /// Re-reads the record from the registry on a fixed interval.
  Poll { interval: Duration },
}

impl SubscriptionMode {
  pub fn poll() -> Self {
    SubscriptionMode::Poll {
      interval: DEFAULT_POLL_INTERVAL,
    }
  }
}

/// Event delivered to an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
  /// Full snapshot of the record.
  State { flow: FlowState },
  /// The flow reached a terminal status; the channel ends after this.
  Completed {
    flow: FlowState,
    #[serde(rename = "finalDocument")]
    final_document: Option<String>,
  },
  /// The record disappeared; the channel ends after this.
  Deleted {
    #[serde(rename = "flowId")]
    flow_id: String,
  },
}

impl FlowEvent {
  pub fn name(&self) -> &'static str {
    match self {
      FlowEvent::State { .. } => "state",
      FlowEvent::Completed { .. } => "completed",
      FlowEvent::Deleted { .. } => "deleted",
    }
  }
}

enum Source {
  Push(watch::Receiver<FlowState>),
  Poll { flows: FlowMap, interval: Duration },
}

enum Change {
  State(FlowState),
  Deleted,
  Expired,
}

/// A live channel of [`FlowEvent`]s for one flow.
///
/// The first event is always a `state` snapshot. The channel ends after a
/// `completed` or `deleted` event, or silently when its ceiling elapses.
/// Dropping it releases everything it holds.
pub struct Subscription {
  flow_id: String,
  source: Source,
  lookup: FinalDocumentLookup,
  deadline: Instant,
  last: Option<FlowState>,
  finished: bool,
}

impl Subscription {
  pub(crate) fn push(
    flow_id: String,
    updates: watch::Receiver<FlowState>,
    lookup: FinalDocumentLookup,
    ceiling: Duration,
  ) -> Self {
    Self::new(flow_id, Source::Push(updates), lookup, ceiling)
  }

  pub(crate) fn poll(
    flow_id: String,
    flows: FlowMap,
    interval: Duration,
    lookup: FinalDocumentLookup,
    ceiling: Duration,
  ) -> Self {
    Self::new(flow_id, Source::Poll { flows, interval }, lookup, ceiling)
  }

  fn new(flow_id: String, source: Source, lookup: FinalDocumentLookup, ceiling: Duration) -> Self {
    Self {
      flow_id,
      source,
      lookup,
      deadline: Instant::now() + ceiling,
      last: None,
      finished: false,
    }
  }

  pub fn flow_id(&self) -> &str {
    &self.flow_id
  }

  /// Wait for the next event. `None` once the channel has ended.
  pub async fn next(&mut self) -> Option<FlowEvent> {
    if self.finished {
      return None;
    }

    if let Some(last) = &self.last
      && last.is_terminal()
    {
      self.finished = true;
      return Some(FlowEvent::Completed {
        final_document: self.lookup.resolve(last),
        flow: last.clone(),
      });
    }

    let change = match self.last {
      None => self.current(),
      Some(_) => self.changed().await,
    };

    match change {
      Change::State(flow) => {
        self.last = Some(flow.clone());
        Some(FlowEvent::State { flow })
      }
      Change::Deleted => {
        debug!(flow_id = %self.flow_id, "subscribed flow deleted");
        self.finished = true;
        Some(FlowEvent::Deleted {
          flow_id: self.flow_id.clone(),
        })
      }
      Change::Expired => {
        warn!(flow_id = %self.flow_id, "subscription ceiling reached");
        self.finished = true;
        None
      }
    }
  }

  /// The subscription as a stream of events.
  pub fn into_stream(self) -> impl Stream<Item = FlowEvent> + Send {
    futures::stream::unfold(self, |mut subscription| async move {
      let event = subscription.next().await?;
      Some((event, subscription))
    })
  }

  fn current(&mut self) -> Change {
    match &mut self.source {
      Source::Push(updates) => Change::State(updates.borrow_and_update().clone()),
      Source::Poll { flows, .. } => match read_flow(flows, &self.flow_id) {
        Some(flow) => Change::State(flow),
        None => Change::Deleted,
      },
    }
  }

  async fn changed(&mut self) -> Change {
    let Self {
      flow_id,
      source,
      deadline,
      last,
      ..
    } = self;

    match source {
      Source::Push(updates) => match timeout_at(*deadline, updates.changed()).await {
        Err(_) => Change::Expired,
        Ok(Err(_)) => Change::Deleted,
        Ok(Ok(())) => Change::State(updates.borrow_and_update().clone()),
      },
      Source::Poll { flows, interval } => loop {
        let wake = Instant::now() + *interval;
        if wake >= *deadline {
          sleep_until(*deadline).await;
          return Change::Expired;
        }
        sleep_until(wake).await;

        match read_flow(flows, flow_id) {
          None => return Change::Deleted,
          Some(flow) if last.as_ref() != Some(&flow) => return Change::State(flow),
          Some(_) => continue,
        }
      },
    }
  }
}

fn read_flow(flows: &FlowMap, id: &str) -> Option<FlowState> {
  read(flows).get(id).map(|slot| slot.snapshot())
}
