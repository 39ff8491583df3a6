//! Configuration loaded from environment variables.
//!
//! Both binaries call `dotenvy::dotenv()` first, then [`RelayConfig::from_env`].
//! Every value has a default; malformed values are rejected instead of being
//! silently replaced.

use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be used.
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// Which substrate the relay runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Shared Redis instance; gateway and workers run as separate processes.
    Redis,
    /// In-process substrate; the gateway runs its own worker pool.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend '{other}', expected 'redis' or 'memory'")),
        }
    }
}

/// Queue/slot substrate settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstrateConfig {
    /// Backend selection
    pub backend: Backend,
    /// Redis connection URL
    pub redis_url: String,
    /// Optional key prefix so several deployments can share one Redis
    pub namespace: Option<String>,
    /// Total connect attempts per reconnect sequence
    pub max_reconnect_attempts: usize,
}

impl SubstrateConfig {
    /// Backoff policy for connect attempts.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.max_reconnect_attempts)
    }

    /// Redis URL with any password masked, for logs.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        redact_url(&self.redis_url)
    }
}

/// Correlator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// Deadline applied when the caller does not give one
    pub default_deadline: Duration,
    /// Extra lifetime of a slot registration beyond the deadline, so a slot
    /// never expires while its waiter is still listening
    pub slot_grace: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
            slot_grace: Duration::from_secs(5),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Prefix for all API routes
    pub api_prefix: String,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
    /// Port for a dedicated metrics listener
    pub metrics_port: Option<u16>,
}

impl ServerConfig {
    /// Socket address the HTTP server binds to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| ConfigError::InvalidValue("HOST", format!("{e}")))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Socket address of the dedicated metrics listener, if configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `host` is not an IP address.
    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        let Some(port) = self.metrics_port else {
            return Ok(None);
        };
        Ok(Some(SocketAddr::new(self.bind_addr()?.ip(), port)))
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops
    pub concurrency: usize,
    /// How long one dequeue blocks before the loop checks for shutdown
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Settings handed to the worker-side agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// Agent display name
    pub name: String,
    /// Lifetime of memory entries
    pub memory_ttl: Duration,
    /// Chat completions backend; `None` keeps the rule-based replies
    pub llm: Option<LlmSettings>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "DefaultAgent".to_string(),
            memory_ttl: Duration::from_secs(3600),
            llm: None,
        }
    }
}

/// OpenAI-compatible chat completions backend.
#[derive(Clone, PartialEq, Eq)]
pub struct LlmSettings {
    /// Bearer token
    pub api_key: String,
    /// Model name sent with every request
    pub model: String,
    /// API root, without the trailing `/chat/completions`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Total attempts for transient failures
    pub max_attempts: usize,
}

impl LlmSettings {
    /// Settings for `api_key` with the default model and endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gpt-4".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Substrate settings
    pub substrate: SubstrateConfig,
    /// Correlator settings
    pub correlator: CorrelatorConfig,
    /// HTTP server settings
    pub server: ServerConfig,
    /// Worker pool settings
    pub worker: WorkerConfig,
    /// Agent settings
    pub agent: AgentSettings,
}

impl RelayConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable numbers, unknown
    /// backends, zero deadlines, zero reconnect attempts or zero concurrency.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from a map (tests, embedding).
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::from_env`].
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let redis_url = match lookup("REDIS_URL") {
            Some(url) => url,
            None => format!(
                "redis://{}:{}/{}",
                vars.string("REDIS_HOST", "redis"),
                vars.parse::<u16>("REDIS_PORT", 6379)?,
                vars.parse::<u32>("REDIS_DB", 0)?,
            ),
        };
        if !redis_url.starts_with("redis://") && !redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL",
                "must start with redis:// or rediss://".to_string(),
            ));
        }

        let substrate = SubstrateConfig {
            backend: vars.parse("RELAY_BACKEND", Backend::Redis)?,
            redis_url,
            namespace: lookup("REDIS_NAMESPACE").filter(|ns| !ns.trim().is_empty()),
            max_reconnect_attempts: vars.positive("MAX_RECONNECT_ATTEMPTS", 3)?,
        };

        let correlator = CorrelatorConfig {
            default_deadline: Duration::from_secs(vars.positive("REQUEST_TIMEOUT_SECS", 30)?),
            slot_grace: Duration::from_secs(vars.parse("SLOT_GRACE_SECS", 5)?),
        };

        let server = ServerConfig {
            host: vars.string("HOST", "0.0.0.0"),
            port: vars.parse("PORT", 8000)?,
            api_prefix: normalize_prefix(&vars.string("API_PREFIX", "/api/v1")),
            cors_origins: vars
                .string("CORS_ORIGINS", "*")
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect(),
            metrics_port: lookup("METRICS_PORT")
                .map(|raw| {
                    raw.trim()
                        .parse()
                        .map_err(|e| ConfigError::InvalidValue("METRICS_PORT", format!("{e}")))
                })
                .transpose()?,
        };

        let worker = WorkerConfig {
            concurrency: vars.positive("WORKER_CONCURRENCY", 1)?,
            poll_interval: Duration::from_secs(vars.positive("WORKER_POLL_SECS", 1)?),
        };

        let llm = match lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty()) {
            Some(api_key) => {
                let defaults = LlmSettings::new(api_key.trim());
                Some(LlmSettings {
                    model: vars.string("OPENAI_MODEL", &defaults.model),
                    base_url: vars
                        .string("OPENAI_BASE_URL", &defaults.base_url)
                        .trim_end_matches('/')
                        .to_string(),
                    timeout: Duration::from_secs(vars.positive("LLM_TIMEOUT_SECS", 30)?),
                    max_attempts: vars.positive("LLM_MAX_ATTEMPTS", defaults.max_attempts)?,
                    ..defaults
                })
            }
            None => None,
        };

        let agent = AgentSettings {
            name: vars.string("AGENT_NAME", "DefaultAgent"),
            memory_ttl: Duration::from_secs(vars.positive("MEMORY_TTL_SECS", 3600)?),
            llm,
        };

        Ok(Self {
            substrate,
            correlator,
            server,
            worker,
            agent,
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidValue(key, format!("{e}"))),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(key, default)?;
        if value == T::default() {
            return Err(ConfigError::InvalidValue(key, "must be greater than zero".to_string()));
        }
        Ok(value)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split_once(':').map_or(credentials, |(user, _)| user);
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}
