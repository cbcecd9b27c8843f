//! OpenAI-compatible chat completion client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GeneratorError;
use crate::generator::{Generation, GenerationRequest, Generator};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role: &'static str,
  content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
  #[serde(default)]
  model: Option<String>,
  #[serde(default)]
  choices: Vec<Choice>,
  #[serde(default)]
  usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
  message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
  #[serde(default)]
  content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
  total_tokens: u64,
}

/// Generator backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpGenerator {
  client: Client,
  endpoint: String,
  model: String,
  api_key: Option<String>,
}

impl HttpGenerator {
  pub fn new(
    endpoint: impl Into<String>,
    model: impl Into<String>,
    api_key: Option<String>,
    timeout: Duration,
  ) -> Result<Self, GeneratorError> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      endpoint: endpoint.into().trim_end_matches('/').to_string(),
      model: model.into(),
      api_key,
    })
  }

  fn completions_url(&self) -> String {
    format!("{}/chat/completions", self.endpoint)
  }
}

fn to_generation(response: CompletionResponse, requested: &str) -> Result<Generation, GeneratorError> {
  let text = response
    .choices
    .into_iter()
    .next()
    .and_then(|choice| choice.message.content)
    .filter(|text| !text.trim().is_empty())
    .ok_or(GeneratorError::EmptyResponse)?;

  Ok(Generation {
    text,
    model: response.model.unwrap_or_else(|| requested.to_string()),
    tokens_used: response.usage.map(|usage| usage.total_tokens),
  })
}

#[async_trait]
impl Generator for HttpGenerator {
  fn default_model(&self) -> &str {
    &self.model
  }

  async fn generate(&self, request: GenerationRequest) -> Result<Generation, GeneratorError> {
    let model = request.model.as_deref().unwrap_or(&self.model);

    let mut messages = Vec::with_capacity(2);
    if let Some(system_prompt) = &request.system_prompt {
      messages.push(ChatMessage {
        role: "system",
        content: system_prompt,
      });
    }
    messages.push(ChatMessage {
      role: "user",
      content: &request.prompt,
    });

    let body = CompletionRequest {
      model,
      messages,
      temperature: request.temperature,
      max_tokens: request.max_tokens,
    };

    debug!(model = %model, prompt_chars = request.prompt.len(), "sending completion request");

    let mut builder = self.client.post(self.completions_url()).json(&body);
    if let Some(key) = &self.api_key {
      builder = builder.bearer_auth(key);
    }

    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(GeneratorError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let parsed: CompletionResponse = response.json().await?;
    to_generation(parsed, model)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_request_body_shape() {
    let body = CompletionRequest {
      model: "gpt-4.1",
      messages: vec![
        ChatMessage {
          role: "system",
          content: "be brief",
        },
        ChatMessage {
          role: "user",
          content: "hello",
        },
      ],
      temperature: 0.3,
      max_tokens: None,
    };

    let value = serde_json::to_value(&body).unwrap();
    assert_eq!(value["model"], "gpt-4.1");
    assert_eq!(value["messages"][0]["role"], "system");
    assert_eq!(value["messages"][1]["content"], "hello");
    assert!(value.get("max_tokens").is_none());
  }

  #[test]
  fn test_to_generation_reads_first_choice_and_usage() {
    let response: CompletionResponse = serde_json::from_value(json!({
      "model": "gpt-4.1-2025",
      "choices": [{"message": {"role": "assistant", "content": "An outline"}}],
      "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .unwrap();

    let generation = to_generation(response, "gpt-4.1").unwrap();
    assert_eq!(generation.text, "An outline");
    assert_eq!(generation.model, "gpt-4.1-2025");
    assert_eq!(generation.tokens_used, Some(15));
  }

  #[test]
  fn test_to_generation_rejects_empty_content() {
    let response: CompletionResponse = serde_json::from_value(json!({
      "choices": [{"message": {"role": "assistant", "content": ""}}]
    }))
    .unwrap();
    assert!(matches!(
      to_generation(response, "m"),
      Err(GeneratorError::EmptyResponse)
    ));

    let response: CompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
    assert!(matches!(
      to_generation(response, "m"),
      Err(GeneratorError::EmptyResponse)
    ));
  }

  #[test]
  fn test_endpoint_trailing_slash_is_trimmed() {
    let generator =
      HttpGenerator::new("http://localhost:8080/v1/", "m", None, Duration::from_secs(5)).unwrap();
    assert_eq!(
      generator.completions_url(),
      "http://localhost:8080/v1/chat/completions"
    );
  }
}
