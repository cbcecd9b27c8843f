//! Content store endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use draftflow_content::Content;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::AppState;
use crate::{Result, ServerError};

pub fn routes() -> Router<AppState> {
  Router::new().route("/api/content", get(list_content).post(create_content))
}

#[derive(Debug, Deserialize)]
struct CreateContentRequest {
  #[serde(default)]
  id: Option<String>,
  #[serde(default)]
  title: String,
  #[serde(default)]
  body: String,
}

async fn list_content(State(state): State<AppState>) -> Result<Json<Value>> {
  let contents = state.content.list().await?;
  Ok(Json(json!({ "contents": contents })))
}

async fn create_content(
  State(state): State<AppState>,
  Json(request): Json<CreateContentRequest>,
) -> Result<(StatusCode, Json<Value>)> {
  if request.body.trim().is_empty() {
    return Err(ServerError::BadRequest("Missing required field: body".to_string()));
  }

  let content = match request.id {
    Some(id) => Content::with_id(id, request.title, request.body),
    None => Content::new(request.title, request.body),
  };
  state.content.put(content.clone()).await?;
  info!(content_id = %content.id, words = content.word_count(), "content_stored");

  Ok((StatusCode::CREATED, Json(json!({ "content": content }))))
}
