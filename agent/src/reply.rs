//! Conversation replies.
//!
//! [`RuleBasedReplier`] answers offline; [`LlmReplier`] asks a chat
//! completions backend, retrying transient failures.

use crate::agent::{Role, Turn};
use crate::error::{AgentError, Result};
use crate::llm::{ChatClient, LlmError};
use relay_runtime::LlmSettings;
use relay_runtime::retry::{RetryPolicy, retry_with_predicate};
use std::future::Future;

/// Produces the assistant's answer to one user message.
pub trait Replier: Send + Sync {
    /// Answer `message` given the transcript so far.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Llm`] when a backend fails.
    fn reply(&self, message: &str, history: &[Turn]) -> impl Future<Output = Result<String>> + Send;
}

/// Canned replies: `ping` gets `pong`, anything else an acknowledgement with
/// the turn number.
#[derive(Debug, Clone)]
pub struct RuleBasedReplier {
    name: String,
}

impl RuleBasedReplier {
    /// Replier that signs acknowledgements with `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Replier for RuleBasedReplier {
    async fn reply(&self, message: &str, history: &[Turn]) -> Result<String> {
        if message.trim().eq_ignore_ascii_case("ping") {
            return Ok("pong".to_string());
        }
        let turn = history.iter().filter(|t| t.role == Role::User).count() + 1;
        Ok(format!(
            "{} received your message (turn {turn}): {}",
            self.name,
            message.trim()
        ))
    }
}

/// Replies from a chat completions backend.
#[derive(Clone)]
pub struct LlmReplier {
    client: ChatClient,
    policy: RetryPolicy,
}

impl LlmReplier {
    /// Replier over `client`; transient failures are retried per `policy`.
    #[must_use]
    pub const fn new(client: ChatClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Replier built from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Llm`] if the HTTP client cannot be built.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let client = ChatClient::new(settings)?;
        Ok(Self::new(
            client,
            RetryPolicy::with_max_attempts(settings.max_attempts),
        ))
    }
}

impl Replier for LlmReplier {
    async fn reply(&self, message: &str, history: &[Turn]) -> Result<String> {
        let mut messages = history.to_vec();
        messages.push(Turn {
            role: Role::User,
            content: message.to_string(),
        });

        tracing::debug!(model = %self.client.model(), turns = messages.len(), "Requesting completion");
        let reply = retry_with_predicate(
            &self.policy,
            || self.client.complete(&messages),
            LlmError::is_transient,
        )
        .await?;
        Ok(reply)
    }
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        Self::Llm(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": text}}]
        }))
    }

    fn replier(server: &MockServer, attempts: usize) -> LlmReplier {
        let settings = LlmSettings {
            base_url: server.uri(),
            ..LlmSettings::new("sk-test")
        };
        let policy = RetryPolicy::builder()
            .max_attempts(attempts)
            .initial_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(20))
            .build();
        LlmReplier::new(ChatClient::new(&settings).unwrap(), policy)
    }

    #[tokio::test]
    async fn rule_based_counts_user_turns() {
        let replier = RuleBasedReplier::new("Bot");
        let history = vec![
            Turn {
                role: Role::User,
                content: "one".into(),
            },
            Turn {
                role: Role::Assistant,
                content: "ack".into(),
            },
        ];
        assert_eq!(replier.reply(" PING ", &[]).await.unwrap(), "pong");
        assert_eq!(
            replier.reply("two", &history).await.unwrap(),
            "Bot received your message (turn 2): two"
        );
    }

    #[tokio::test]
    async fn history_is_sent_before_the_new_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "user", "content": "hello"},
                    {"role": "assistant", "content": "hi there"},
                    {"role": "user", "content": "how are you?"},
                ],
            })))
            .respond_with(completion("fine, thanks"))
            .expect(1)
            .mount(&server)
            .await;

        let history = vec![
            Turn {
                role: Role::User,
                content: "hello".into(),
            },
            Turn {
                role: Role::Assistant,
                content: "hi there".into(),
            },
        ];
        let reply = replier(&server, 1).reply("how are you?", &history).await.unwrap();
        assert_eq!(reply, "fine, thanks");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(completion("recovered"))
            .expect(1)
            .mount(&server)
            .await;

        let reply = replier(&server, 3).reply("hello", &[]).await.unwrap();
        assert_eq!(reply, "recovered");
    }

    #[tokio::test]
    async fn bad_credentials_fail_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = replier(&server, 3).reply("hello", &[]).await.unwrap_err();
        assert_eq!(err, AgentError::Llm("Unauthorized - invalid API key".to_string()));
    }
}
