//! OpenAI-compatible chat completion adapter. Works against any endpoint
//! that accepts the `/chat/completions` request shape, including vLLM.
//! Guided decoding is expressed through the `response_format` field.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use dialogue_configuration::{LlmConfig, RetryConfig};
use dialogue_domain::{CompletionRequest, DecodingMode, DomainError, LlmPort};

pub struct OpenAiCompatLlm {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    transport_attempts: u32,
    transport_backoff: Duration,
}

impl OpenAiCompatLlm {
    pub fn from_config(config: &LlmConfig, retry: &RetryConfig) -> Result<Self, DomainError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| transport_error(format!("http client: {err}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            transport_attempts: retry.transport_attempts.max(1),
            transport_backoff: Duration::from_millis(retry.transport_backoff_ms),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "temperature": request.sampling.temperature,
            "top_p": request.sampling.top_p,
            "max_tokens": request.sampling.max_tokens,
        });
        if request.mode == DecodingMode::Guided {
            if let Some(schema) = &request.schema {
                body["response_format"] = json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": "structured_output",
                        "schema": schema,
                    }
                });
            }
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<String, DomainError> {
        let mut last_failure = String::new();
        for attempt in 1..=self.transport_attempts {
            if attempt > 1 {
                let backoff = self.transport_backoff * 2u32.saturating_pow(attempt - 2);
                tokio::time::sleep(backoff).await;
            }
            let mut builder = self.http.post(self.completions_url()).json(body);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }
            let response = match builder.send().await {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "completion request failed");
                    last_failure = err.to_string();
                    continue;
                }
            };
            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                tracing::debug!(attempt, %status, "completion endpoint busy");
                last_failure = format!("status {status}");
                continue;
            }
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(transport_error(format!("status {status}: {detail}")));
            }
            let parsed: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|err| transport_error(format!("response decode: {err}")))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content)
                .ok_or_else(|| transport_error("response has no choices".to_string()));
        }
        Err(transport_error(format!(
            "no response after {} attempt(s): {last_failure}",
            self.transport_attempts
        )))
    }
}

#[async_trait]
impl LlmPort for OpenAiCompatLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<String, DomainError> {
        let body = self.request_body(&request);
        tracing::trace!(model = %self.model, mode = ?request.mode, "sending completion request");
        self.send(&body).await
    }
}

fn transport_error(detail: String) -> DomainError {
    DomainError::Transport {
        collaborator: "llm",
        detail,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}
