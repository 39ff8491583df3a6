//! The agent behind a worker, driven through the correlator.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use relay_agent::Agent;
use relay_core::{AgentQuery, Map, Outcome};
use relay_runtime::{
    AgentSettings, ConnectionManager, Correlator, CorrelatorConfig, InMemoryConnector,
    InMemorySubstrate, LlmSettings, RetryPolicy,
};
use relay_testing::responders;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn correlator(substrate: &InMemorySubstrate) -> Correlator {
    let connection = Arc::new(ConnectionManager::new(
        Arc::new(InMemoryConnector::new(substrate.clone())),
        RetryPolicy::with_max_attempts(1),
    ));
    Correlator::new(connection, CorrelatorConfig::default())
}

fn analysis_query(code: &str) -> AgentQuery {
    let mut context = Map::new();
    context.insert("type".into(), json!("code_analysis"));
    context.insert("code".into(), json!(code));
    AgentQuery::new("analyze this").with_context(context)
}

#[tokio::test]
async fn conversation_round_trip() {
    let substrate = InMemorySubstrate::new();
    let responder = responders::spawn(&substrate, Arc::new(Agent::new(&AgentSettings::default())));
    let correlator = correlator(&substrate);

    let pong = correlator
        .submit(AgentQuery::new("ping"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(pong.outcome, Outcome::Success);
    assert_eq!(pong.result, json!("pong"));

    let ack = correlator
        .submit(AgentQuery::new("hello there"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(
        ack.result,
        json!("DefaultAgent received your message (turn 2): hello there")
    );

    responder.stop().await;
}

#[tokio::test]
async fn analysis_round_trip_with_suggestions() {
    let substrate = InMemorySubstrate::new();
    let responder = responders::spawn(&substrate, Arc::new(Agent::new(&AgentSettings::default())));
    let correlator = correlator(&substrate);

    let methods: String = (0..11)
        .map(|i| format!("    def m{i}(self):\n        pass\n"))
        .collect();
    let code = format!("import os\n\nclass Big:\n{methods}");

    let response = correlator
        .submit(analysis_query(&code), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response.outcome, Outcome::Success);
    let result = response.result;

    assert_eq!(result["classes"][0]["name"], json!("Big"));
    assert_eq!(result["classes"][0]["methods"].as_array().unwrap().len(), 11);
    assert_eq!(result["imports"], json!(["os"]));
    assert_eq!(result["suggestions"][0]["class_name"], json!("Big"));

    responder.stop().await;
}

#[tokio::test]
async fn missing_code_is_a_failure_response() {
    let substrate = InMemorySubstrate::new();
    let responder = responders::spawn(&substrate, Arc::new(Agent::new(&AgentSettings::default())));
    let correlator = correlator(&substrate);

    let mut context = Map::new();
    context.insert("type".into(), json!("code_analysis"));
    let response = correlator
        .submit(AgentQuery::new("analyze").with_context(context), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(
        response.outcome,
        Outcome::Failure("context field 'code' is required".to_string())
    );

    responder.stop().await;
}

#[tokio::test]
async fn configured_language_model_answers_conversation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello from the model"}}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let settings = AgentSettings {
        llm: Some(LlmSettings {
            base_url: server.uri(),
            ..LlmSettings::new("sk-test")
        }),
        ..AgentSettings::default()
    };
    let substrate = InMemorySubstrate::new();
    let responder = responders::spawn(&substrate, relay_agent::handler(&settings).unwrap());
    let correlator = correlator(&substrate);

    for query in ["hi", "and again"] {
        let response = correlator
            .submit(AgentQuery::new(query), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.outcome, Outcome::Success);
        assert_eq!(response.result, json!("Hello from the model"));
    }

    // The second request carries the first exchange
    let requests = server.received_requests().await.unwrap();
    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(
        second["messages"],
        json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "Hello from the model"},
            {"role": "user", "content": "and again"},
        ])
    );

    responder.stop().await;
}

#[tokio::test]
async fn unreachable_language_model_is_a_failure_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let settings = AgentSettings {
        llm: Some(LlmSettings {
            base_url: server.uri(),
            ..LlmSettings::new("sk-wrong")
        }),
        ..AgentSettings::default()
    };
    let substrate = InMemorySubstrate::new();
    let responder = responders::spawn(&substrate, relay_agent::handler(&settings).unwrap());
    let correlator = correlator(&substrate);

    let response = correlator
        .submit(AgentQuery::new("hi"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(
        response.outcome,
        Outcome::Failure("language model error: Unauthorized - invalid API key".to_string())
    );

    responder.stop().await;
}
