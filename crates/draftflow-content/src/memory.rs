use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Content, ContentError, ContentStore, validate_id};

/// In-memory content store. Contents are lost when the process exits.
#[derive(Default)]
pub struct InMemoryContentStore {
  items: RwLock<BTreeMap<String, Content>>,
}

impl InMemoryContentStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a store pre-populated with the given items.
  pub fn with_contents(contents: impl IntoIterator<Item = Content>) -> Self {
    let items = contents
      .into_iter()
      .map(|content| (content.id.clone(), content))
      .collect();
    Self {
      items: RwLock::new(items),
    }
  }

  pub async fn len(&self) -> usize {
    self.items.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.items.read().await.is_empty()
  }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
  async fn retrieve(&self, id: &str) -> Result<Option<Content>, ContentError> {
    Ok(self.items.read().await.get(id).cloned())
  }

  async fn list(&self) -> Result<Vec<Content>, ContentError> {
    Ok(self.items.read().await.values().cloned().collect())
  }

  async fn put(&self, content: Content) -> Result<(), ContentError> {
    validate_id(&content.id)?;
    self.items.write().await.insert(content.id.clone(), content);
    Ok(())
  }
}
