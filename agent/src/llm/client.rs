//! OpenAI-compatible chat completions client.

use crate::agent::Turn;
use crate::llm::error::LlmError;
use crate::llm::messages::{ChatRequest, ChatResponse, TEMPERATURE};
use relay_runtime::LlmSettings;
use reqwest::{Client, StatusCode};

/// Chat completions API client.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl ChatClient {
    /// Create a client from settings.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Config`] if the HTTP client cannot be built.
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            api_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }

    /// Model sent with every request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask for the next assistant message after `messages`.
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures
    pub async fn complete(&self, messages: &[Turn]) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json::<ChatResponse>()
                .await
                .map_err(|e| LlmError::ResponseParseFailed(e.to_string()))?
                .into_text()
                .ok_or(LlmError::EmptyCompletion),
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited),
            StatusCode::UNAUTHORIZED => Err(LlmError::Unauthorized),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(LlmError::ApiError {
                    status: status.as_u16(),
                    message: body,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::agent::Role;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str) -> LlmSettings {
        LlmSettings {
            base_url: format!("{base_url}/"),
            timeout: Duration::from_secs(5),
            ..LlmSettings::new("sk-test")
        }
    }

    fn user(content: &str) -> Turn {
        Turn {
            role: Role::User,
            content: content.to_string(),
        }
    }

    #[test]
    fn client_creation() {
        let client = ChatClient::new(&settings("http://llm.local/v1")).unwrap();
        assert_eq!(client.api_url, "http://llm.local/v1");
        assert_eq!(client.model(), "gpt-4");
    }

    #[tokio::test]
    async fn sends_transcript_and_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4",
                "messages": [{"role": "user", "content": "hi"}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello!"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(&settings(&server.uri())).unwrap();
        assert_eq!(client.complete(&[user("hi")]).await.unwrap(), "hello!");
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .mount(&server)
            .await;

        let client = ChatClient::new(&settings(&server.uri())).unwrap();
        let messages = [user("hi")];
        assert_eq!(client.complete(&messages).await, Err(LlmError::Unauthorized));
        assert_eq!(client.complete(&messages).await, Err(LlmError::RateLimited));
        assert_eq!(
            client.complete(&messages).await,
            Err(LlmError::ApiError {
                status: 400,
                message: "bad model".to_string()
            })
        );
    }

    #[tokio::test]
    async fn empty_choices_are_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = ChatClient::new(&settings(&server.uri())).unwrap();
        assert_eq!(client.complete(&[user("hi")]).await, Err(LlmError::EmptyCompletion));
    }
}
