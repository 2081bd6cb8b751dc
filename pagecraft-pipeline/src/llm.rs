//! Chat completions client for the code-generation model.
//!
//! Single-turn only: a system framing plus one user prompt in, plain text
//! out. Transport and status failures are returned as-is; retrying is the
//! caller's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::GenerateError;

/// Anything that can turn a prompt into text.
#[async_trait]
pub trait CodeModel: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerateError>;
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

/// Response from the chat completions endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Chat completions API client.
pub struct LlmClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl LlmClient {
    /// Fails immediately when no API key is configured.
    pub fn new(config: &PipelineConfig) -> Result<Self, GenerateError> {
        let api_key = config
            .openai_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(GenerateError::MissingCredential("OPENAI_API_KEY"))?;
        Ok(Self {
            api_key,
            model: config.openai_model.clone(),
            base_url: config.openai_api_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        })
    }

    /// Send a conversation and get the raw response.
    pub async fn chat(
        &self,
        messages: Vec<Message>,
        max_tokens: u32,
    ) -> Result<ChatResponse, GenerateError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.7,
            max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerateError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = resp.json::<ChatResponse>().await?;
        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion finished"
            );
        }
        Ok(parsed)
    }
}

#[async_trait]
impl CodeModel for LlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerateError> {
        let messages = vec![Message::system(system), Message::user(prompt)];
        let resp = self.chat(messages, 4000).await?;
        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(GenerateError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: &str, key: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            openai_api_key: key.map(str::to_string),
            openai_api_url: base.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let err = LlmClient::new(&config("http://127.0.0.1:9", None))
            .err()
            .expect("missing key must be rejected");
        assert!(matches!(err, GenerateError::MissingCredential("OPENAI_API_KEY")));

        let err = LlmClient::new(&config("http://127.0.0.1:9", Some("")))
            .err()
            .expect("empty key must be rejected");
        assert!(matches!(err, GenerateError::MissingCredential(_)));
    }

    #[tokio::test]
    async fn completes_with_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "max_tokens": 4000,
                "messages": [{"role": "system", "content": "sys"}, {"role": "user", "content": "hi"}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(&server.uri(), Some("sk-test"))).unwrap();
        assert_eq!(client.complete("sys", "hi").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn rate_limit_is_propagated_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(&server.uri(), Some("sk-test"))).unwrap();
        match client.complete("sys", "hi").await {
            Err(GenerateError::Upstream { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(&server.uri(), Some("sk-test"))).unwrap();
        assert!(matches!(
            client.complete("sys", "hi").await,
            Err(GenerateError::EmptyResponse)
        ));
    }
}
