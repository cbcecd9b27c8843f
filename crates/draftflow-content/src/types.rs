use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored source material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
  pub id: String,
  pub title: String,
  pub body: String,
  pub created_at: DateTime<Utc>,
}

impl Content {
  /// Create a content item with a fresh id.
  pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
    Self::with_id(uuid::Uuid::new_v4().to_string(), title, body)
  }

  pub fn with_id(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      title: title.into(),
      body: body.into(),
      created_at: Utc::now(),
    }
  }

  pub fn word_count(&self) -> usize {
    self.body.split_whitespace().count()
  }
}
