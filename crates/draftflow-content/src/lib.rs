//! Draftflow Content
//!
//! This crate provides the content store trait and implementations for
//! draftflow. Content items are the source materials a flow's input ids point
//! at; stages resolve them through the [`ContentStore`] trait and never care
//! where they live.
//!
//! Two backends are provided:
//! - [`InMemoryContentStore`] for tests and ephemeral servers
//! - [`FsContentStore`] for a directory of files

mod fs;
mod memory;
mod types;

pub use fs::FsContentStore;
pub use memory::InMemoryContentStore;
pub use types::Content;

use async_trait::async_trait;

/// Error type for content store operations.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
  /// The id cannot be used as a storage key.
  #[error("invalid content id: {0:?}")]
  InvalidId(String),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A stored item could not be decoded.
  #[error("malformed content {id}: {source}")]
  Malformed {
    id: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Content storage trait.
///
/// Lookups of unknown ids are not errors: `retrieve` returns `Ok(None)`.
#[async_trait]
pub trait ContentStore: Send + Sync {
  /// Retrieve a content item by id.
  async fn retrieve(&self, id: &str) -> Result<Option<Content>, ContentError>;

  /// List every stored content item, ordered by id.
  async fn list(&self) -> Result<Vec<Content>, ContentError>;

  /// Persist a content item, replacing any item with the same id.
  async fn put(&self, content: Content) -> Result<(), ContentError>;
}

/// Ids double as file stems, so they are restricted to a safe alphabet.
pub(crate) fn validate_id(id: &str) -> Result<(), ContentError> {
  let valid = !id.is_empty()
    && id.len() <= 128
    && id
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    && !id.starts_with('.');

  if valid {
    Ok(())
  } else {
    Err(ContentError::InvalidId(id.to_string()))
  }
}
