use std::time::Duration;

use thiserror::Error;

use crate::provider::TaskClass;

/// Failures reported by a model backend or by the call path in front of it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("rate limited by {provider}{}", retry_hint(.retry_after_ms))]
    RateLimited {
        provider: String,
        retry_after_ms: Option<u64>,
    },

    #[error("transient provider error (status {status}): {message}")]
    Transient { status: u16, message: String },

    #[error("provider rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("no healthy provider for task class {0}")]
    Unavailable(TaskClass),

    #[error("failed to parse provider response: {0}")]
    MalformedResponse(String),
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {ms}ms"),
        None => String::new(),
    }
}

impl ProviderError {
    /// Whether the orchestrator may retry the stage after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Rejected { .. })
    }

    /// Throttling responses feed the limiter's penalty box.
    pub fn is_throttle(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Typed failure of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("model output did not match the expected schema: {0}")]
    MalformedOutput(String),

    #[error("invalid agent input: {0}")]
    InvalidInput(String),

    #[error("policy rejection: {0}")]
    PolicyRejection(String),
}

impl AgentError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AgentError::Provider(e) if e.is_retryable() => FailureKind::Retryable,
            AgentError::Provider(_) => FailureKind::Terminal,
            AgentError::Timeout(_) | AgentError::MalformedOutput(_) => FailureKind::Retryable,
            AgentError::InvalidInput(_) | AgentError::PolicyRejection(_) => FailureKind::Terminal,
        }
    }
}

/// Classifies a stage failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Timeouts, throttling, transient provider faults. Absorbed by the retry loop.
    Retryable,
    /// Invalid input or policy rejection. Escalates to `Failed` immediately.
    Terminal,
    /// The job was cancelled by an operator.
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Retryable => write!(f, "Retryable"),
            FailureKind::Terminal => write!(f, "Terminal"),
            FailureKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("workflow already exists: {0}")]
    AlreadyExists(String),

    #[error("version conflict on {job_id}: expected {expected}, found {found}")]
    Conflict {
        job_id: String,
        expected: u64,
        found: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no route configured for task class {0}")]
    MissingRoute(TaskClass),

    #[error("route for {task_class} names unknown provider {provider}")]
    UnknownProvider {
        task_class: TaskClass,
        provider: String,
    },

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {0} is already running in this process")]
    AlreadyRunning(String),

    #[error("job {job_id} is leased by {holder} until {until}")]
    LeaseHeld {
        job_id: String,
        holder: String,
        until: chrono::DateTime<chrono::Utc>,
    },

    #[error("gave up on job {0} after repeated version conflicts")]
    ConflictLimitExceeded(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("worker for job {job_id} stopped before finishing")]
    WorkerAborted { job_id: String },

    #[error("invalid review: {0}")]
    InvalidReview(String),
}
