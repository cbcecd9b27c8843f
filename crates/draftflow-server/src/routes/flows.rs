//! Flow endpoints with SSE streaming.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use draftflow_engine::{FlowAction, FlowError, FlowEvent, SubscriptionMode};
use draftflow_stage::FlowContext;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::AppState;
use crate::{Result, ServerError};

const MISSING_FIELDS: &str = "Missing required fields: goal and inputIds";

pub fn routes() -> Router<AppState> {
  Router::new()
    .route("/api/flows", get(list_flows).post(start_flow))
    .route("/api/flows/stream", post(start_flow_streaming))
    .route("/api/flows/stats", get(flow_stats))
    .route("/api/flows/{id}", get(get_flow))
    .route("/api/flows/{id}/events", get(flow_events))
    .route("/api/flows/{id}/document", get(final_document))
    .route("/api/flows/{id}/{action}", post(control_flow))
}

/// Request body for starting a flow.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartFlowRequest {
  #[serde(default)]
  id: Option<String>,
  #[serde(default)]
  goal: String,
  #[serde(default, alias = "documentIds")]
  input_ids: Vec<String>,
  #[serde(default)]
  preferences: BTreeMap<String, String>,
  #[serde(default)]
  style: Option<String>,
  #[serde(default)]
  constraints: Vec<String>,
  #[serde(default)]
  max_tokens: Option<u32>,
  #[serde(default, alias = "preferredModel")]
  provider: Option<String>,
}

impl StartFlowRequest {
  fn into_context(self) -> Result<(Option<String>, FlowContext)> {
    if self.goal.trim().is_empty() || self.input_ids.iter().all(|id| id.trim().is_empty()) {
      return Err(ServerError::BadRequest(MISSING_FIELDS.to_string()));
    }

    let mut preferences = self.preferences;
    if let Some(style) = self.style {
      preferences.insert("style".to_string(), style);
    }
    let context = FlowContext {
      goal: self.goal,
      input_ids: self.input_ids,
      preferences,
      constraints: self.constraints,
      stage_outputs: BTreeMap::new(),
      max_tokens: self.max_tokens,
      provider: self.provider,
    }
    .normalized();
    Ok((self.id, context))
  }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
  #[serde(default)]
  mode: Option<String>,
}

async fn start_flow(
  State(state): State<AppState>,
  Json(request): Json<StartFlowRequest>,
) -> Result<Json<Value>> {
  let (id, context) = request.into_context()?;
  let flow = state.flows.spawn_flow(context, id)?;
  Ok(Json(json!({ "id": flow.id, "flow": flow })))
}

/// Start a flow and stream its snapshots as SSE.
///
/// The flow is driven on a background task and the response is a push
/// subscription, so a client disconnect only closes this channel.
async fn start_flow_streaming(
  State(state): State<AppState>,
  Json(request): Json<StartFlowRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
  let (id, context) = request.into_context()?;
  let driver = state.flows.start_flow(context, id)?;
  let flow_id = driver.id().to_string();
  let subscription = state.flows.subscribe(&flow_id, SubscriptionMode::Push)?;
  tokio::spawn(driver.run_to_completion());
  info!(flow_id = %flow_id, "streaming flow");

  let started = stream::once(async move {
    Event::default()
      .event("started")
      .json_data(json!({ "type": "started", "flowId": flow_id }))
  });
  let events = subscription.into_stream().map(|event| sse_event(&event));

  Ok(Sse::new(started.chain(events)).keep_alive(KeepAlive::default()))
}

async fn list_flows(State(state): State<AppState>) -> Json<Value> {
  Json(json!({ "flows": state.flows.get_all_flows() }))
}

async fn flow_stats(State(state): State<AppState>) -> Json<Value> {
  Json(json!({ "stats": state.flows.get_flow_stats() }))
}

async fn get_flow(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
  let flow = state
    .flows
    .get_flow_state(&id)
    .ok_or(FlowError::NotFound { id })?;
  Ok(Json(json!({ "flow": flow })))
}

async fn flow_events(
  State(state): State<AppState>,
  Path(id): Path<String>,
  Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
  let poll = query.mode.as_deref() == Some("poll");
  let subscription = state.flows.subscribe_default(&id, poll)?;
  info!(flow_id = %id, poll, "subscription opened");

  let events = subscription.into_stream().map(|event| sse_event(&event));
  Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn control_flow(
  State(state): State<AppState>,
  Path((id, action)): Path<(String, String)>,
) -> Result<Json<Value>> {
  let action: FlowAction = action.parse()?;
  let flow = state.flows.control(&id, action)?;
  Ok(Json(json!({ "success": true, "flow": flow })))
}

async fn final_document(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
  if state.flows.get_flow_state(&id).is_none() {
    return Err(FlowError::NotFound { id }.into());
  }
  Ok(Json(json!({ "finalDocument": state.flows.get_final_document(&id) })))
}

fn sse_event(event: &FlowEvent) -> std::result::Result<Event, axum::Error> {
  Event::default().event(event.name()).json_data(event)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_start_request_requires_goal_and_inputs() {
    let request: StartFlowRequest = serde_json::from_value(json!({"goal": "Brief"})).unwrap();
    let err = request.into_context().unwrap_err();
    assert_eq!(err.to_string(), MISSING_FIELDS);

    let request: StartFlowRequest =
      serde_json::from_value(json!({"goal": " ", "inputIds": ["a"]})).unwrap();
    assert!(request.into_context().is_err());
  }

  #[test]
  fn test_start_request_builds_context() {
    let request: StartFlowRequest = serde_json::from_value(json!({
      "goal": "Brief",
      "documentIds": ["a", "b", "a"],
      "style": "Casual",
      "maxTokens": 2000,
      "preferredModel": "gpt-4.1-mini"
    }))
    .unwrap();

    let (id, context) = request.into_context().unwrap();
    assert_eq!(id, None);
    assert_eq!(context.input_ids, vec!["a", "b"]);
    assert_eq!(context.style(), Some("Casual"));
    assert_eq!(context.max_tokens, Some(2000));
    assert_eq!(context.provider.as_deref(), Some("gpt-4.1-mini"));
  }
}
