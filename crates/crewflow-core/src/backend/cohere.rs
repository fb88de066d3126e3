use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{BackendError, CrewflowError};
use crate::security::{SecretValue, require_env};

use super::{BackendReply, CompletionRequest, InferenceBackend, react};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    message: &'a str,
    temperature: f32,
    stop_sequences: &'a [&'a str],
}

#[derive(Deserialize)]
struct ChatResponse {
    text: String,
}

/// Cohere chat API client speaking the ReAct text protocol.
///
/// Retries transport failures and 429/5xx responses with exponential backoff.
pub struct CohereBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: SecretValue,
    max_retries: usize,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl CohereBackend {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CrewflowError> {
        if !config.provider.eq_ignore_ascii_case("cohere") {
            return Err(CrewflowError::InvalidConfiguration(format!(
                "unsupported llm.provider '{}'; only 'cohere' is available",
                config.provider
            )));
        }

        let api_key = require_env(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| {
                CrewflowError::InvalidConfiguration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        })
    }

    async fn send_once(&self, message: &str) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            message,
            temperature: self.temperature,
            stop_sequences: &["\nObservation:"],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| BackendError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Malformed(err.to_string()))?;
        Ok(payload.text)
    }
}

#[async_trait]
impl InferenceBackend for CohereBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<BackendReply, BackendError> {
        let message = request.transcript();
        let mut attempt = 0;
        let mut backoff_ms = self.initial_backoff_ms;

        loop {
            debug!(
                task_id = %request.task_id,
                model = %self.model,
                attempt,
                "sending completion request"
            );

            match self.send_once(&message).await {
                Ok(text) => return react::parse_reply(&text),
                Err(err) if attempt < self.max_retries && err.is_retryable() => {
                    attempt += 1;
                    warn!(
                        task_id = %request.task_id,
                        error = %err,
                        attempt,
                        backoff_ms,
                        "completion failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = next_backoff(backoff_ms, self.max_backoff_ms);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn next_backoff(current_ms: u64, max_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        assert_eq!(next_backoff(1_000, 30_000), 2_000);
        assert_eq!(next_backoff(20_000, 30_000), 30_000);
        assert_eq!(next_backoff(u64::MAX / 2 + 1, u64::MAX), u64::MAX);
    }
}
