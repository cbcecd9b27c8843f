use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level settings for a draftflow process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
  pub server: ServerSettings,
  pub flows: FlowSettings,
  pub generator: GeneratorSettings,
  pub content: ContentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
  /// Socket address the HTTP server listens on.
  pub bind: String,
}

impl Default for ServerSettings {
  fn default() -> Self {
    Self {
      bind: "127.0.0.1:3000".to_string(),
    }
  }
}

/// Flow registry and update channel tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowSettings {
  /// Re-read interval for polling subscriptions.
  pub poll_interval_ms: u64,
  /// Hard lifetime of a single subscription channel.
  pub subscription_ceiling_secs: u64,
  /// How often the cleanup sweep runs.
  pub cleanup_interval_secs: u64,
  /// Terminal flows older than this are removed by the sweep.
  pub max_age_secs: u64,
}

impl Default for FlowSettings {
  fn default() -> Self {
    Self {
      poll_interval_ms: 500,
      subscription_ceiling_secs: 15 * 60,
      cleanup_interval_secs: 10 * 60,
      max_age_secs: 24 * 60 * 60,
    }
  }
}

impl FlowSettings {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn subscription_ceiling(&self) -> Duration {
    Duration::from_secs(self.subscription_ceiling_secs)
  }

  pub fn cleanup_interval(&self) -> Duration {
    Duration::from_secs(self.cleanup_interval_secs)
  }

  pub fn max_age(&self) -> Duration {
    Duration::from_secs(self.max_age_secs)
  }
}

/// Connection details for the external generative service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorSettings {
  /// Base URL of an OpenAI-compatible API (the client appends `/chat/completions`).
  pub endpoint: String,
  /// Model used when a flow does not request a provider.
  pub model: String,
  /// Name of the environment variable holding the API key.
  pub api_key_env: String,
  pub timeout_secs: u64,
}

impl Default for GeneratorSettings {
  fn default() -> Self {
    Self {
      endpoint: "https://api.openai.com/v1".to_string(),
      model: "gpt-4.1".to_string(),
      api_key_env: "DRAFTFLOW_API_KEY".to_string(),
      timeout_secs: 120,
    }
  }
}

impl GeneratorSettings {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  /// Read the API key from the configured environment variable, if set.
  pub fn api_key(&self) -> Option<String> {
    std::env::var(&self.api_key_env)
      .ok()
      .filter(|key| !key.trim().is_empty())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContentSettings {
  /// Directory backing the filesystem content store. Relative to the data
  /// directory when not absolute; `<data_dir>/content` when unset.
  pub dir: Option<PathBuf>,
}

impl ContentSettings {
  pub fn resolve_dir(&self, data_dir: &Path) -> PathBuf {
    match &self.dir {
      Some(dir) if dir.is_absolute() => dir.clone(),
      Some(dir) => data_dir.join(dir),
      None => data_dir.join("content"),
    }
  }
}

impl Settings {
  /// Load settings from a JSON file, or the defaults when `path` is `None`.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let settings = match path {
      Some(path) => Self::from_file(path)?,
      None => Self::default(),
    };
    settings.validate()?;
    Ok(settings)
  }

  fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Reject values that would make the registry or channels misbehave.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.flows.poll_interval_ms == 0 {
      return Err(ConfigError::Invalid {
        field: "flows.poll_interval_ms",
        message: "must be greater than zero".to_string(),
      });
    }
    if self.flows.subscription_ceiling_secs == 0 {
      return Err(ConfigError::Invalid {
        field: "flows.subscription_ceiling_secs",
        message: "must be greater than zero".to_string(),
      });
    }
    if self.flows.cleanup_interval_secs == 0 {
      return Err(ConfigError::Invalid {
        field: "flows.cleanup_interval_secs",
        message: "must be greater than zero".to_string(),
      });
    }
    if self.server.bind.trim().is_empty() {
      return Err(ConfigError::Invalid {
        field: "server.bind",
        message: "must not be empty".to_string(),
      });
    }
    Ok(())
  }
}
