//! The agent: route a query to a capability, run it, remember the outcome.
//!
//! Processing happens in three steps:
//!
//! 1. [`Agent::think`] picks a [`Capability`] and extracts its input into a [`Plan`]
//! 2. [`Agent::act`] runs the plan against memory and tools
//! 3. [`Agent::reflect`] writes what should be remembered back to memory
//!
//! [`Agent::process`] runs steps 2 and 3 under a per-capability lock: two
//! concurrent conversation turns read and extend the transcript one after the
//! other, never from the same snapshot.

use crate::error::{AgentError, Result};
use crate::memory::{InMemoryStore, MemoryStore};
use crate::reply::{LlmReplier, Replier, RuleBasedReplier};
use crate::tools::{
    CodeAnalysis, ToolKind, analyze_code_structure, suggest_improvements, track_code_changes,
};
use relay_core::{AgentQuery, Request, Response, Value};
use relay_runtime::{AgentSettings, RequestHandler};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Memory key of the conversation transcript.
pub const CONVERSATION_HISTORY: &str = "conversation_history";

/// Memory key of the last code analysis.
pub const PREVIOUS_CODE_ANALYSIS: &str = "previous_code_analysis";

/// Context `type` that selects code analysis.
pub const CODE_ANALYSIS_TYPE: &str = "code_analysis";

/// Turns kept in the conversation transcript.
pub const MAX_HISTORY_TURNS: usize = 100;

/// What the agent can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Chat, answered by the agent's [`Replier`]
    Conversation,
    /// Structure analysis of Python source
    CodeAnalysis,
}

impl Capability {
    /// Capability a query asks for: `context.type == "code_analysis"` selects
    /// code analysis, anything else is conversation.
    #[must_use]
    pub fn of(query: &AgentQuery) -> Self {
        if query.context_str("type") == Some(CODE_ANALYSIS_TYPE) {
            Self::CodeAnalysis
        } else {
            Self::Conversation
        }
    }

    /// Tools this capability uses.
    #[must_use]
    pub const fn tools(self) -> &'static [ToolKind] {
        match self {
            Self::Conversation => &[],
            Self::CodeAnalysis => &ToolKind::ALL,
        }
    }
}

/// Input extracted from a query for one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Reply to a chat message
    Converse {
        /// The user's message
        message: String,
    },
    /// Analyse source code
    AnalyzeCode {
        /// Python source
        code: String,
    },
}

impl Plan {
    /// Capability that executes this plan.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        match self {
            Self::Converse { .. } => Capability::Conversation,
            Self::AnalyzeCode { .. } => Capability::CodeAnalysis,
        }
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller
    User,
    /// The agent
    Assistant,
}

/// One turn of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who spoke
    pub role: Role,
    /// What was said
    pub content: String,
}

/// Result of [`Agent::act`].
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Chat reply, with the transcript it extends
    Replied {
        /// Transcript before this exchange
        history: Vec<Turn>,
        /// The user's message
        message: String,
        /// The agent's answer
        reply: String,
    },
    /// Completed analysis
    Analyzed(Box<CodeAnalysis>),
}

impl Action {
    /// Value returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Memory`] if the analysis cannot be serialized.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Self::Replied { reply, .. } => Ok(Value::String(reply.clone())),
            Self::Analyzed(analysis) => {
                serde_json::to_value(analysis).map_err(|e| AgentError::Memory(e.to_string()))
            }
        }
    }
}

/// Worker-side agent.
pub struct Agent<M = InMemoryStore, R = RuleBasedReplier> {
    name: String,
    memory: M,
    memory_ttl: Duration,
    replier: R,
    conversation: Mutex<()>,
    analysis: Mutex<()>,
}

impl Agent<InMemoryStore> {
    /// Agent with process-local memory and rule-based replies.
    #[must_use]
    pub fn new(settings: &AgentSettings) -> Self {
        Self::with_memory(settings, InMemoryStore::new())
    }
}

impl<M: MemoryStore> Agent<M> {
    /// Agent backed by `memory`, with rule-based replies.
    #[must_use]
    pub fn with_memory(settings: &AgentSettings, memory: M) -> Self {
        tracing::info!(agent = %settings.name, "Initializing agent");
        Self {
            name: settings.name.clone(),
            memory,
            memory_ttl: settings.memory_ttl,
            replier: RuleBasedReplier::new(settings.name.clone()),
            conversation: Mutex::new(()),
            analysis: Mutex::new(()),
        }
    }
}

impl<M: MemoryStore, R: Replier> Agent<M, R> {
    /// Same agent, answering conversation turns with `replier`.
    #[must_use]
    pub fn with_replier<R2: Replier>(self, replier: R2) -> Agent<M, R2> {
        Agent {
            name: self.name,
            memory: self.memory,
            memory_ttl: self.memory_ttl,
            replier,
            conversation: Mutex::new(()),
            analysis: Mutex::new(()),
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing memory.
    #[must_use]
    pub const fn memory(&self) -> &M {
        &self.memory
    }

    /// Run the full think, act, reflect cycle for one query.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the query lacks required context, the
    /// submitted code cannot be scanned, or memory fails.
    pub async fn process(&self, query: &AgentQuery) -> Result<Value> {
        let plan = self.think(query)?;
        let _exclusive = self.exclusive(plan.capability()).await;
        let action = self.act(&plan).await?;
        self.reflect(&action).await?;
        action.to_value()
    }

    /// Choose a capability and extract its input.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingField`] when code analysis is requested
    /// without `context.code`.
    pub fn think(&self, query: &AgentQuery) -> Result<Plan> {
        let plan = match Capability::of(query) {
            Capability::CodeAnalysis => Plan::AnalyzeCode {
                code: query
                    .context_str("code")
                    .ok_or(AgentError::MissingField("code"))?
                    .to_string(),
            },
            Capability::Conversation => Plan::Converse {
                message: query.query.clone(),
            },
        };
        tracing::debug!(agent = %self.name, capability = ?plan.capability(), "Planned");
        Ok(plan)
    }

    /// Execute a plan.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] from the tools or memory.
    pub async fn act(&self, plan: &Plan) -> Result<Action> {
        match plan {
            Plan::Converse { message } => {
                let history = self.history().await?;
                let reply = self.replier.reply(message, &history).await?;
                Ok(Action::Replied {
                    history,
                    message: message.clone(),
                    reply,
                })
            }
            Plan::AnalyzeCode { code } => {
                let analysis = self.analyze(code).await?;
                Ok(Action::Analyzed(Box::new(analysis)))
            }
        }
    }

    /// Remember the outcome of an action.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Memory`] if the write fails.
    pub async fn reflect(&self, action: &Action) -> Result<()> {
        let (key, value) = match action {
            Action::Replied {
                history,
                message,
                reply,
            } => {
                let mut transcript = history.clone();
                transcript.push(Turn {
                    role: Role::User,
                    content: message.clone(),
                });
                transcript.push(Turn {
                    role: Role::Assistant,
                    content: reply.clone(),
                });
                let excess = transcript.len().saturating_sub(MAX_HISTORY_TURNS);
                transcript.drain(..excess);
                (CONVERSATION_HISTORY, serde_json::to_value(transcript))
            }
            Action::Analyzed(analysis) => (PREVIOUS_CODE_ANALYSIS, serde_json::to_value(analysis)),
        };
        let value = value.map_err(|e| AgentError::Memory(e.to_string()))?;
        self.memory.store(key, value, Some(self.memory_ttl)).await
    }

    async fn history(&self) -> Result<Vec<Turn>> {
        let Some(stored) = self.memory.retrieve(CONVERSATION_HISTORY).await? else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_value(stored).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Discarding unreadable conversation history");
            Vec::new()
        }))
    }

    async fn exclusive(&self, capability: Capability) -> MutexGuard<'_, ()> {
        match capability {
            Capability::Conversation => self.conversation.lock().await,
            Capability::CodeAnalysis => self.analysis.lock().await,
        }
    }

    async fn analyze(&self, code: &str) -> Result<CodeAnalysis> {
        tracing::debug!(tool = %ToolKind::AnalyzeCodeStructure, "Executing tool");
        let mut analysis = analyze_code_structure(code)?;

        let previous = self
            .memory
            .retrieve(PREVIOUS_CODE_ANALYSIS)
            .await?
            .and_then(|stored| serde_json::from_value::<CodeAnalysis>(stored).ok());
        if let Some(previous) = previous {
            tracing::debug!(tool = %ToolKind::TrackCodeChanges, "Executing tool");
            analysis.changes = Some(track_code_changes(&analysis, &previous));
        }

        tracing::debug!(tool = %ToolKind::SuggestImprovements, "Executing tool");
        analysis.suggestions = suggest_improvements(&analysis);
        Ok(analysis)
    }
}

impl<M: MemoryStore, R: Replier> RequestHandler for Agent<M, R> {
    fn handle(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
        Box::pin(async move {
            match self.process(&request.query).await {
                Ok(value) => Response::success(request.id, value),
                Err(e) => {
                    tracing::warn!(id = %request.id, error = %e, "Agent failed to process request");
                    Response::failure(request.id, e.to_string())
                }
            }
        })
    }
}

/// Agent for a worker, with the chat completions backend when `settings.llm`
/// is configured and rule-based replies otherwise.
///
/// # Errors
///
/// Returns [`AgentError::Llm`] if the HTTP client cannot be built.
pub fn handler(settings: &AgentSettings) -> Result<Arc<dyn RequestHandler>> {
    let agent = Agent::new(settings);
    match &settings.llm {
        Some(llm) => {
            tracing::info!(agent = %settings.name, model = %llm.model, "Conversation answered by language model");
            Ok(Arc::new(agent.with_replier(LlmReplier::from_settings(llm)?)))
        }
        None => {
            tracing::info!(agent = %settings.name, "Conversation answered by rule-based replier");
            Ok(Arc::new(agent))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use relay_core::{CorrelationId, Map, Outcome};
    use relay_testing::test_clock;
    use serde_json::json;

    fn settings() -> AgentSettings {
        AgentSettings {
            name: "TestAgent".to_string(),
            memory_ttl: Duration::from_secs(60),
            llm: None,
        }
    }

    /// Memory whose reads take a while, so concurrent turns overlap.
    struct SlowReads(InMemoryStore);

    impl MemoryStore for SlowReads {
        async fn store(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
            self.0.store(key, value, ttl).await
        }

        async fn retrieve(&self, key: &str) -> Result<Option<Value>> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.0.retrieve(key).await
        }

        async fn forget(&self, key: &str) -> Result<bool> {
            self.0.forget(key).await
        }
    }

    fn code_query(code: &str) -> AgentQuery {
        let mut context = Map::new();
        context.insert("type".into(), json!(CODE_ANALYSIS_TYPE));
        context.insert("code".into(), json!(code));
        AgentQuery::new("analyze").with_context(context)
    }

    #[test]
    fn routes_by_context_type() {
        assert_eq!(Capability::of(&AgentQuery::new("hi")), Capability::Conversation);
        assert_eq!(Capability::of(&code_query("")), Capability::CodeAnalysis);
        assert!(Capability::Conversation.tools().is_empty());
        assert_eq!(Capability::CodeAnalysis.tools().len(), 3);
    }

    #[test]
    fn code_analysis_requires_code() {
        let agent = Agent::new(&settings());
        let mut context = Map::new();
        context.insert("type".into(), json!(CODE_ANALYSIS_TYPE));
        let query = AgentQuery::new("analyze").with_context(context);
        assert_eq!(agent.think(&query), Err(AgentError::MissingField("code")));
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let agent = Agent::new(&settings());
        let value = agent.process(&AgentQuery::new("ping")).await.unwrap();
        assert_eq!(value, json!("pong"));
    }

    #[tokio::test]
    async fn acknowledgement_counts_turns() {
        let agent = Agent::new(&settings());
        let first = agent.process(&AgentQuery::new("hello")).await.unwrap();
        let second = agent.process(&AgentQuery::new("again")).await.unwrap();

        assert_eq!(first, json!("TestAgent received your message (turn 1): hello"));
        assert_eq!(second, json!("TestAgent received your message (turn 2): again"));

        let history = agent.memory().retrieve(CONVERSATION_HISTORY).await.unwrap().unwrap();
        assert_eq!(history.as_array().unwrap().len(), 4);
        assert_eq!(history[0], json!({"role": "user", "content": "hello"}));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_turns_extend_one_transcript() {
        let agent = Agent::with_memory(&settings(), SlowReads(InMemoryStore::new()));
        let hello = AgentQuery::new("hello");
        let again = AgentQuery::new("again");

        let (first, second) = tokio::join!(agent.process(&hello), agent.process(&again));

        assert_eq!(first.unwrap(), json!("TestAgent received your message (turn 1): hello"));
        assert_eq!(second.unwrap(), json!("TestAgent received your message (turn 2): again"));
        let history = agent.memory().retrieve(CONVERSATION_HISTORY).await.unwrap().unwrap();
        assert_eq!(history.as_array().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn analyses_do_not_wait_for_conversation() {
        let agent = Agent::with_memory(&settings(), SlowReads(InMemoryStore::new()));
        let chat = AgentQuery::new("hello");
        let code = code_query("class A:\n    pass\n");

        let started = tokio::time::Instant::now();
        let (reply, analysis) = tokio::join!(agent.process(&chat), agent.process(&code));

        reply.unwrap();
        assert_eq!(analysis.unwrap()["classes"][0]["name"], json!("A"));
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn transcript_is_bounded() {
        let agent = Agent::new(&settings());
        for i in 0..MAX_HISTORY_TURNS {
            agent.process(&AgentQuery::new(format!("m{i}"))).await.unwrap();
        }
        let history = agent.memory().retrieve(CONVERSATION_HISTORY).await.unwrap().unwrap();
        assert_eq!(history.as_array().unwrap().len(), MAX_HISTORY_TURNS);
    }

    #[tokio::test]
    async fn second_analysis_reports_changes() {
        let agent = Agent::new(&settings());
        let first = agent
            .process(&code_query("class A:\n    def run(self):\n        pass\n"))
            .await
            .unwrap();
        assert!(first.get("changes").is_none());

        let second = agent
            .process(&code_query("class B:\n    pass\n"))
            .await
            .unwrap();
        assert_eq!(second["changes"]["added_classes"], json!(["B"]));
        assert_eq!(second["changes"]["removed_classes"], json!(["A"]));
        assert_eq!(second["changes"]["complexity_change"]["num_functions"], json!(-1));
    }

    #[tokio::test]
    async fn expired_memory_forgets_previous_analysis() {
        let clock = test_clock();
        let agent = Agent::with_memory(
            &settings(),
            InMemoryStore::with_clock(Arc::new(clock.clone())),
        );
        agent.process(&code_query("class A:\n    pass\n")).await.unwrap();

        clock.advance(Duration::from_secs(61));
        let value = agent.process(&code_query("class B:\n    pass\n")).await.unwrap();
        assert!(value.get("changes").is_none());
    }

    #[tokio::test]
    async fn handler_reports_failures_in_response() {
        let agent = Agent::new(&settings());
        let id = CorrelationId::new(9);

        let ok = agent.handle(Request::new(id, AgentQuery::new("ping"))).await;
        assert_eq!(ok.id, id);
        assert!(ok.outcome.is_success());

        let failed = agent.handle(Request::new(id, code_query("def f(:\n"))).await;
        assert_eq!(failed.id, id);
        assert!(matches!(
            failed.outcome,
            Outcome::Failure(ref message) if message.starts_with("could not parse code")
        ));
    }
}
