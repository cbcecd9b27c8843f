//! The external generative service seam.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::GeneratorError;

/// One text generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
  pub prompt: String,
  pub system_prompt: Option<String>,
  /// Model to use; `None` selects the generator's default.
  pub model: Option<String>,
  pub temperature: f32,
  pub max_tokens: Option<u32>,
}

impl GenerationRequest {
  pub fn new(prompt: impl Into<String>) -> Self {
    Self {
      prompt: prompt.into(),
      system_prompt: None,
      model: None,
      temperature: 0.7,
      max_tokens: None,
    }
  }

  pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
    self.system_prompt = Some(system_prompt.into());
    self
  }

  pub fn with_model(mut self, model: impl Into<String>) -> Self {
    self.model = Some(model.into());
    self
  }

  pub fn with_temperature(mut self, temperature: f32) -> Self {
    self.temperature = temperature;
    self
  }

  pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
    self.max_tokens = Some(max_tokens);
    self
  }
}

/// Generated text plus what the service reported about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
  pub text: String,
  /// Model that actually served the request.
  pub model: String,
  /// Token usage if the service reported it.
  pub tokens_used: Option<u64>,
}

/// An external generative service.
#[async_trait]
pub trait Generator: Send + Sync {
  /// Model used when a request does not name one.
  fn default_model(&self) -> &str;

  async fn generate(&self, request: GenerationRequest) -> Result<Generation, GeneratorError>;
}

type Script = dyn Fn(&GenerationRequest) -> Result<String, GeneratorError> + Send + Sync;

/// Deterministic generator answering from a closure. Used by tests and dry
/// runs; keeps every request it receives.
pub struct ScriptedGenerator {
  model: String,
  script: Box<Script>,
  requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
  pub fn new<F>(model: impl Into<String>, script: F) -> Self
  where
    F: Fn(&GenerationRequest) -> Result<String, GeneratorError> + Send + Sync + 'static,
  {
    Self {
      model: model.into(),
      script: Box::new(script),
      requests: Mutex::new(Vec::new()),
    }
  }

  /// Answers every request with a short text naming the model and the
  /// first prompt line.
  pub fn echo(model: impl Into<String>) -> Self {
    Self::new(model, |request| {
      let first = request.prompt.lines().next().unwrap_or_default();
      Ok(format!("Generated: {}", first))
    })
  }

  /// Requests received so far, in order.
  pub fn requests(&self) -> Vec<GenerationRequest> {
    match self.requests.lock() {
      Ok(requests) => requests.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }
}

#[async_trait]
impl Generator for ScriptedGenerator {
  fn default_model(&self) -> &str {
    &self.model
  }

  async fn generate(&self, request: GenerationRequest) -> Result<Generation, GeneratorError> {
    let model = request.model.clone().unwrap_or_else(|| self.model.clone());
    let outcome = (self.script)(&request);
    match self.requests.lock() {
      Ok(mut requests) => requests.push(request),
      Err(poisoned) => poisoned.into_inner().push(request),
    }
    let text = outcome?;
    Ok(Generation {
      text,
      model,
      tokens_used: None,
    })
  }
}
