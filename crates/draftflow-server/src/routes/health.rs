use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

pub fn routes() -> Router {
  Router::new().route("/api/health", get(health_check))
}

async fn health_check() -> Json<Value> {
  Json(json!({ "status": "ok" }))
}
