use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use crate::{Content, ContentError, ContentStore, validate_id};

/// Extensions read as plain text; the file stem becomes both id and title.
const PLAIN_EXTENSIONS: &[&str] = &["md", "txt"];

/// Filesystem-based content store.
///
/// Content lives in a single directory:
/// ```text
/// {root}/
/// ├── quarterly-report.json   (written by `put`, full `Content` record)
/// ├── interview-notes.md      (plain text, dropped in by hand)
/// └── glossary.txt
/// ```
///
/// When several files share a stem, the JSON record wins.
pub struct FsContentStore {
  root: PathBuf,
}

impl FsContentStore {
  /// Create a new store rooted at the given directory.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  async fn read_record(&self, id: &str, path: &Path) -> Result<Option<Content>, ContentError> {
    let raw = match fs::read_to_string(path).await {
      Ok(raw) => raw,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    let content = serde_json::from_str(&raw).map_err(|source| ContentError::Malformed {
      id: id.to_string(),
      source,
    })?;
    Ok(Some(content))
  }

  async fn read_plain(&self, id: &str, path: &Path) -> Result<Option<Content>, ContentError> {
    let body = match fs::read_to_string(path).await {
      Ok(body) => body,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    let created_at = fs::metadata(path)
      .await
      .and_then(|m| m.modified())
      .map(DateTime::<Utc>::from)
      .unwrap_or_else(|_| Utc::now());

    Ok(Some(Content {
      id: id.to_string(),
      title: id.to_string(),
      body,
      created_at,
    }))
  }
}

#[async_trait]
impl ContentStore for FsContentStore {
  async fn retrieve(&self, id: &str) -> Result<Option<Content>, ContentError> {
    // An id that cannot be a file stem names nothing stored here.
    if validate_id(id).is_err() {
      debug!(content_id = %id, "content id is not a valid file stem");
      return Ok(None);
    }

    let record_path = self.root.join(format!("{}.json", id));
    if let Some(content) = self.read_record(id, &record_path).await? {
      debug!(content_id = %id, path = %record_path.display(), "content retrieved");
      return Ok(Some(content));
    }

    for ext in PLAIN_EXTENSIONS {
      let path = self.root.join(format!("{}.{}", id, ext));
      if let Some(content) = self.read_plain(id, &path).await? {
        debug!(content_id = %id, path = %path.display(), "content retrieved");
        return Ok(Some(content));
      }
    }

    debug!(content_id = %id, "content not found");
    Ok(None)
  }

  async fn list(&self) -> Result<Vec<Content>, ContentError> {
    let mut items: Vec<Content> = Vec::new();

    if !self.root.exists() {
      return Ok(items);
    }

    let mut ids: Vec<String> = Vec::new();
    let mut entries = fs::read_dir(&self.root).await?;
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if !path.is_file() {
        continue;
      }

      let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
      if ext != "json" && !PLAIN_EXTENSIONS.contains(&ext) {
        continue;
      }

      if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        && validate_id(stem).is_ok()
        && !ids.iter().any(|known| known == stem)
      {
        ids.push(stem.to_string());
      }
    }

    ids.sort();
    for id in ids {
      if let Some(content) = self.retrieve(&id).await? {
        items.push(content);
      }
    }

    Ok(items)
  }

  async fn put(&self, content: Content) -> Result<(), ContentError> {
    validate_id(&content.id)?;
    fs::create_dir_all(&self.root).await?;

    let path = self.root.join(format!("{}.json", content.id));
    let raw = serde_json::to_string_pretty(&content).map_err(|source| ContentError::Malformed {
      id: content.id.clone(),
      source,
    })?;
    fs::write(&path, raw).await?;

    debug!(content_id = %content.id, path = %path.display(), "content stored");
    Ok(())
  }
}
