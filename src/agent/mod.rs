//! Coding agent transports.
//!
//! Every transport is a child process speaking a line-delimited JSON protocol
//! on stdout. `process::run_streaming` owns the process lifecycle (timeout,
//! cancellation, kill, exit status); each transport only decodes lines into
//! progress events and a final outcome.

pub mod claude;
pub mod codex;
pub mod process;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::errors::AgentError;
use crate::instruction::Provider;
use crate::util::{shorten_path, truncate_str};

pub use claude::ClaudeRunner;
pub use codex::CodexRunner;
pub use process::AgentCommand;

/// Minimum spacing between non-priority progress updates.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Tool,
    Thinking,
    FileChange,
    Message,
    TurnCompleted,
    Terminal,
}

/// One normalised status line from a running agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Priority events bypass the throttle.
    pub fn is_priority(&self) -> bool {
        matches!(self.kind, ProgressKind::TurnCompleted | ProgressKind::Terminal)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, alias = "cache_read_input_tokens")]
    pub cached_input_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_input_tokens += other.cached_input_tokens;
    }

    pub fn summary(&self) -> String {
        format!(
            "{} input / {} output tokens",
            self.input_tokens, self.output_tokens
        )
    }
}

pub struct AgentRunOptions {
    pub model: Option<String>,
    pub timeout: Duration,
    pub cancel: CancellationToken,
    pub progress: Option<UnboundedSender<ProgressEvent>>,
}

impl AgentRunOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            model: None,
            timeout,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutcome {
    pub output: String,
    pub usage: TokenUsage,
}

/// Abstraction over coding agent execution for testability.
/// Real implementations: `ClaudeRunner`, `CodexRunner`.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    fn provider(&self) -> Provider;

    /// Run the agent to completion inside `workspace`.
    async fn run(
        &self,
        prompt: &str,
        workspace: &Path,
        options: AgentRunOptions,
    ) -> Result<AgentOutcome, AgentError>;
}

/// Runners keyed by provider.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    runners: HashMap<Provider, Arc<dyn AgentRunner>>,
    fallback: Option<Provider>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner for every provider with a non-empty command.
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut registry = Self::new();
        if let Some(command) = AgentCommand::parse(&config.claude_cmd) {
            registry.register(Arc::new(ClaudeRunner::new(command)));
        }
        if let Some(command) = AgentCommand::parse(&config.codex_cmd) {
            registry.register(Arc::new(CodexRunner::new(command)));
        }
        registry.with_fallback(config.default_provider)
    }

    pub fn register(&mut self, runner: Arc<dyn AgentRunner>) {
        self.runners.insert(runner.provider(), runner);
    }

    pub fn with_runner(mut self, runner: Arc<dyn AgentRunner>) -> Self {
        self.register(runner);
        self
    }

    /// Provider used when the requested one has no runner.
    pub fn with_fallback(mut self, provider: Provider) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.runners.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn AgentRunner>, AgentError> {
        if let Some(runner) = self.runners.get(&provider) {
            return Ok(Arc::clone(runner));
        }
        if let Some(fallback) = self.fallback
            && let Some(runner) = self.runners.get(&fallback)
        {
            tracing::warn!(requested = %provider, using = %fallback, "provider not configured, using fallback");
            return Ok(Arc::clone(runner));
        }
        Err(AgentError::Unavailable(format!(
            "no agent configured for provider '{}'",
            provider
        )))
    }
}

/// Rate limit for progress updates. Priority events always pass.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn admit(&mut self, event: &ProgressEvent) -> bool {
        self.admit_at(event, Instant::now())
    }

    pub fn admit_at(&mut self, event: &ProgressEvent, now: Instant) -> bool {
        if event.is_priority() {
            return true;
        }
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Holds the first terminal error of a run; later ones are dropped.
#[derive(Debug, Default)]
pub struct ErrorLatch {
    error: Option<AgentError>,
}

impl ErrorLatch {
    /// Returns true only for the first report.
    pub fn report(&mut self, error: AgentError) -> bool {
        if self.error.is_some() {
            tracing::debug!(suppressed = %error, "error already reported for this run");
            return false;
        }
        self.error = Some(error);
        true
    }

    pub fn is_reported(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_error(self) -> Option<AgentError> {
        self.error
    }
}

/// Human-readable description of a tool invocation.
pub fn describe_tool_use(name: &str, input: &serde_json::Value) -> String {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str());
    let path = || {
        field("file_path")
            .map(shorten_path)
            .unwrap_or_else(|| "file".to_string())
    };
    match name {
        "Read" => format!("Reading: {}", path()),
        "Write" => format!("Creating: {}", path()),
        "Edit" | "MultiEdit" => format!("Editing: {}", path()),
        "Bash" => {
            let cmd = field("command")
                .map(|c| truncate_str(c, 40))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        "Glob" => format!("Searching: {}", field("pattern").unwrap_or("*")),
        "Grep" => {
            let pattern = field("pattern")
                .map(|p| truncate_str(p, 30))
                .unwrap_or_else(|| "pattern".to_string());
            format!("Grep: {}", pattern)
        }
        "Task" => format!("Agent: {}", field("description").unwrap_or("subagent")),
        _ => format!("Tool: {}", name),
    }
}

/// Whether a tool invocation writes to the working tree.
pub fn is_file_tool(name: &str) -> bool {
    matches!(name, "Write" | "Edit" | "MultiEdit" | "NotebookEdit")
}
