//! Service configuration.
//!
//! Layered as file → environment → CLI:
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8080"
//! webhook_secret = "..."
//!
//! [gitlab]
//! url = "https://gitlab.com"
//! token = "glpat-..."
//!
//! [workspace]
//! root = "/tmp/merge-agent"
//! clone_depth = 1
//! author_name = "merge-agent"
//! author_email = "merge-agent@localhost"
//! branch_prefix = "agent"
//!
//! [agent]
//! default_provider = "claude"
//! claude_cmd = "claude"
//! codex_cmd = "codex"
//! timeout_secs = 1800
//! max_timeout_secs = 7200
//!
//! [logging]
//! format = "pretty"
//! ```
//!
//! A `.env` file is honoured through `dotenvy`, and the variables listed in
//! `Config::apply_env` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::instruction::Provider;
use crate::workspace::GitIdentity;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "merge-agent.toml";

const REDACTED: &str = "********";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Shared secret for inbound deliveries. Empty rejects every request.
    #[serde(default)]
    pub webhook_secret: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            webhook_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabConfig {
    #[serde(default = "default_gitlab_url")]
    pub url: String,
    /// API token, also used as the HTTPS clone password.
    #[serde(default)]
    pub token: String,
}

fn default_gitlab_url() -> String {
    "https://gitlab.com".to_string()
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            url: default_gitlab_url(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// 0 clones full history.
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("merge-agent")
}

fn default_clone_depth() -> u32 {
    1
}

fn default_author_name() -> String {
    "merge-agent".to_string()
}

fn default_author_email() -> String {
    "merge-agent@localhost".to_string()
}

fn default_branch_prefix() -> String {
    "agent".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            clone_depth: default_clone_depth(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            branch_prefix: default_branch_prefix(),
        }
    }
}

impl WorkspaceConfig {
    pub fn identity(&self) -> GitIdentity {
        GitIdentity {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider used when a mention names one without a configured command.
    #[serde(default = "default_provider")]
    pub default_provider: Provider,
    /// Claude CLI command line. Empty disables the provider.
    #[serde(default = "default_claude_cmd")]
    pub claude_cmd: String,
    /// Codex CLI command line. Empty disables the provider.
    #[serde(default = "default_codex_cmd")]
    pub codex_cmd: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound for `timeout=` overrides in a mention.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,
}

fn default_provider() -> Provider {
    Provider::Claude
}

fn default_claude_cmd() -> String {
    "claude".to_string()
}

fn default_codex_cmd() -> String {
    "codex".to_string()
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_max_timeout_secs() -> u64 {
    7200
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            claude_cmd: default_claude_cmd(),
            codex_cmd: default_codex_cmd(),
            timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
        }
    }
}

impl AgentConfig {
    /// Effective run timeout: the override when given, capped at
    /// `max_timeout_secs`, otherwise the configured default.
    pub fn timeout_for(&self, override_secs: Option<u64>) -> Duration {
        let secs = match override_secs {
            Some(secs) => secs.min(self.max_timeout_secs.max(1)),
            None => self.timeout_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gitlab: GitLabConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Problems met while loading, reported by `validate` once logging is up.
    #[serde(skip)]
    load_warnings: Vec<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse merge-agent.toml")
    }

    /// Full layered load: `.env`, then the file (explicit path, or
    /// `merge-agent.toml` if present), then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let dotenv_warning = match dotenvy::dotenv() {
            Err(e) if !e.not_found() => Some(format!("failed to load .env file: {}", e)),
            _ => None,
        };

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.load_warnings.extend(dotenv_warning);
        Ok(config)
    }

    /// Override fields from environment variables read through `lookup`.
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WEBHOOK_SECRET") {
            self.server.webhook_secret = v;
        }
        if let Some(v) = get("BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("GITLAB_URL") {
            self.gitlab.url = v;
        }
        if let Some(v) = get("GITLAB_TOKEN") {
            self.gitlab.token = v;
        }
        if let Some(v) = get("WORKSPACE_ROOT") {
            self.workspace.root = PathBuf::from(v);
        }
        if let Some(v) = get("CLONE_DEPTH") {
            self.workspace.clone_depth = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid CLONE_DEPTH '{}'", v))?;
        }
        if let Some(v) = get("GIT_AUTHOR_NAME") {
            self.workspace.author_name = v;
        }
        if let Some(v) = get("GIT_AUTHOR_EMAIL") {
            self.workspace.author_email = v;
        }
        if let Some(v) = get("BRANCH_PREFIX") {
            self.workspace.branch_prefix = v;
        }
        if let Some(v) = get("AGENT_TIMEOUT_SECS") {
            self.agent.timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid AGENT_TIMEOUT_SECS '{}'", v))?;
        }
        if let Some(v) = get("DEFAULT_PROVIDER") {
            self.agent.default_provider = v.parse()?;
        }
        // Commands may be set to an empty string on purpose to disable a
        // provider, so these read the raw value.
        if let Some(v) = lookup("CLAUDE_CMD") {
            self.agent.claude_cmd = v;
        }
        if let Some(v) = lookup("CODEX_CMD") {
            self.agent.codex_cmd = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        Ok(())
    }

    /// Apply CLI overrides.
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            let host = self
                .server
                .bind_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.bind_addr = format!("{}:{}", host, port);
        }
        self
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.load_warnings.clone();

        if self.server.webhook_secret.is_empty() {
            warnings.push("webhook secret is empty: every delivery will be rejected".to_string());
        }
        if self.gitlab.token.is_empty() {
            warnings.push(
                "GitLab token is empty: private clones and all API calls will fail".to_string(),
            );
        }
        if self.agent.claude_cmd.trim().is_empty() && self.agent.codex_cmd.trim().is_empty() {
            warnings.push("no agent command configured: every run will fail".to_string());
        }
        if self.agent.timeout_secs == 0 {
            warnings.push("agent timeout is 0: runs will time out immediately".to_string());
        }
        if self.agent.timeout_secs > self.agent.max_timeout_secs {
            warnings.push(format!(
                "agent timeout {}s exceeds max_timeout_secs {}s",
                self.agent.timeout_secs, self.agent.max_timeout_secs
            ));
        }
        if self.workspace.branch_prefix.trim_matches('/').is_empty() {
            warnings.push("branch prefix is empty".to_string());
        }

        warnings
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |s: &str| {
            if s.is_empty() {
                String::new()
            } else {
                REDACTED.to_string()
            }
        };
        let mut copy = self.clone();
        copy.server.webhook_secret = mask(&self.server.webhook_secret);
        copy.gitlab.token = mask(&self.gitlab.token);
        copy
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
