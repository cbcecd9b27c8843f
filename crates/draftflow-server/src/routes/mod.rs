mod content;
mod flows;
mod health;

use std::sync::Arc;

use axum::Router;
use axum::http::{Method, header};
use draftflow_content::ContentStore;
use draftflow_engine::FlowManager;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
  pub flows: Arc<FlowManager>,
  pub content: Arc<dyn ContentStore>,
}

impl AppState {
  pub fn new(flows: Arc<FlowManager>, content: Arc<dyn ContentStore>) -> Self {
    Self { flows, content }
  }
}

/// The full API router.
pub fn router(state: AppState) -> Router {
  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
    .allow_headers([header::CONTENT_TYPE]);

  Router::new()
    .merge(flows::routes())
    .merge(content::routes())
    .with_state(state)
    .merge(health::routes())
    .layer(TraceLayer::new_for_http())
    .layer(cors)
}
