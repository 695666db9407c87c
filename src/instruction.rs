//! Instruction extraction from free text.
//!
//! Grammar:
//!
//! ```text
//! @provider[key=value,key=value] command text ...
//! ```
//!
//! - `provider` is matched case-insensitively against the supported set.
//! - The bracketed block is optional and must follow the name immediately.
//!   Only `model` and `timeout` are kept; unknown keys and malformed pairs
//!   are dropped.
//! - The command runs until the next `@word` token or end of input.
//! - Only the first recognised mention counts.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::webhook::InboundEvent;

// A mention must start the text or follow a non-word character, so e-mail
// addresses never match.
static MENTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^\w@])@(claude|codex)\b").unwrap());

static NEXT_MENTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)@\w").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Claude, Provider::Codex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            _ => anyhow::bail!("Unknown provider '{}'. Valid values: claude, codex", s),
        }
    }
}

/// The parsed `@provider[...] command` fragment of a text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mention {
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Run timeout override in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub command: String,
}

/// A mention bound to the event it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub provider: Provider,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub command: String,
    pub context: String,
    pub target_branch: String,
}

/// Extract the first recognised mention from `text`.
///
/// Returns `None` when there is no mention or the command after it is empty.
pub fn extract(text: &str) -> Option<Mention> {
    let caps = MENTION_REGEX.captures(text)?;
    let name = caps.get(1)?;
    let provider: Provider = name.as_str().parse().ok()?;

    let mut rest = &text[name.end()..];
    let mut model = None;
    let mut timeout_secs = None;

    if let Some(block) = rest.strip_prefix('[')
        && let Some(close) = block.find(']')
    {
        for (key, value) in parse_parameters(&block[..close]) {
            match key.as_str() {
                "model" => model = Some(value),
                "timeout" => timeout_secs = value.parse::<u64>().ok().filter(|t| *t > 0),
                _ => {}
            }
        }
        rest = &block[close + 1..];
    }

    let rest = rest.trim_start();
    let end = NEXT_MENTION_REGEX
        .find(rest)
        .map(|m| m.start())
        .unwrap_or(rest.len());
    let command = rest[..end].trim();
    if command.is_empty() {
        return None;
    }

    Some(Mention {
        provider,
        model,
        timeout_secs,
        command: command.to_string(),
    })
}

/// Split `k=v,k=v` into trimmed pairs, lowercasing keys and skipping pairs
/// with an empty key or value.
fn parse_parameters(block: &str) -> Vec<(String, String)> {
    block
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key.to_lowercase(), value.to_string()))
        })
        .collect()
}

impl Instruction {
    pub fn new(mention: Mention, context: String, target_branch: String) -> Self {
        Self {
            provider: mention.provider,
            model: mention.model,
            timeout_secs: mention.timeout_secs,
            command: mention.command,
            context,
            target_branch,
        }
    }

    /// Extract an instruction from an event's free text.
    pub fn from_event(event: &InboundEvent) -> Option<Self> {
        let mention = extract(event.mention_text())?;
        Some(Self::new(
            mention,
            event.context_text(),
            event.execution_branch().to_string(),
        ))
    }

    /// The prompt handed to the coding agent.
    pub fn prompt(&self) -> String {
        let mut prompt = String::new();
        prompt.push_str("You are working in a fresh checkout of a git repository.\n");
        prompt.push_str(&format!(
            "The working tree is on branch `{}`.\n\n",
            self.target_branch
        ));
        prompt.push_str("## Task\n\n");
        prompt.push_str(&self.command);
        prompt.push_str("\n\n");
        if !self.context.trim().is_empty() {
            prompt.push_str("## Context\n\n");
            prompt.push_str(self.context.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str("## Rules\n\n");
        prompt.push_str("- Edit files in place in the working tree.\n");
        prompt.push_str("- Do not commit, create branches or push; that is handled for you.\n");
        prompt.push_str("- Finish with a short summary of what you changed.\n");
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_mention() {
        let m = extract("@claude fix bug").unwrap();
        assert_eq!(m.provider, Provider::Claude);
        assert_eq!(m.command, "fix bug");
        assert!(m.model.is_none());
        assert!(m.timeout_secs.is_none());
    }

    #[test]
    fn test_mention_with_parameters() {
        let m = extract("@codex[model=m1,timeout=20] do X").unwrap();
        assert_eq!(m.provider, Provider::Codex);
        assert_eq!(m.model.as_deref(), Some("m1"));
        assert_eq!(m.timeout_secs, Some(20));
        assert_eq!(m.command, "do X");
    }

    #[test]
    fn test_no_mention_is_none() {
        assert!(extract("please fix the bug").is_none());
        assert!(extract("").is_none());
        assert!(extract("@bob fix it").is_none());
    }

    #[test]
    fn test_multiline_command_preserved() {
        let m = extract("@claude first line\nsecond line\n\n  third line  \n\n").unwrap();
        assert_eq!(m.command, "first line\nsecond line\n\n  third line");
    }

    #[test]
    fn test_provider_is_case_insensitive() {
        assert_eq!(extract("@Claude do it").unwrap().provider, Provider::Claude);
        assert_eq!(extract("@CODEX do it").unwrap().provider, Provider::Codex);
    }

    #[test]
    fn test_empty_command_is_none() {
        assert!(extract("@claude").is_none());
        assert!(extract("@claude   \n  ").is_none());
        assert!(extract("@claude[model=x]").is_none());
        assert!(extract("@claude @bob please").is_none());
    }

    #[test]
    fn test_command_stops_at_next_mention() {
        let m = extract("@claude update the changelog @alice fyi").unwrap();
        assert_eq!(m.command, "update the changelog");
    }

    #[test]
    fn test_only_first_mention_honoured() {
        let m = extract("@codex write docs\n@claude write tests").unwrap();
        assert_eq!(m.provider, Provider::Codex);
        assert_eq!(m.command, "write docs");
    }

    #[test]
    fn test_mention_mid_text() {
        let m = extract("Hey team, @claude can you bump the version?").unwrap();
        assert_eq!(m.command, "can you bump the version?");
    }

    #[test]
    fn test_email_address_is_not_a_mention() {
        assert!(extract("contact ops@claude.example for access").is_none());
    }

    #[test]
    fn test_longer_word_is_not_a_mention() {
        assert!(extract("@claudette fix it").is_none());
    }

    #[test]
    fn test_unknown_and_malformed_parameters_ignored() {
        let m = extract("@claude[foo=bar, model = opus ,=x,timeout=,broken] go").unwrap();
        assert_eq!(m.model.as_deref(), Some("opus"));
        assert!(m.timeout_secs.is_none());
        assert_eq!(m.command, "go");
    }

    #[test]
    fn test_non_numeric_timeout_dropped() {
        let m = extract("@claude[timeout=soon] go").unwrap();
        assert!(m.timeout_secs.is_none());
        let m = extract("@claude[timeout=0] go").unwrap();
        assert!(m.timeout_secs.is_none());
    }

    #[test]
    fn test_unclosed_parameter_block_is_command_text() {
        let m = extract("@claude[model=x do it").unwrap();
        assert!(m.model.is_none());
        assert_eq!(m.command, "[model=x do it");
    }

    #[test]
    fn test_email_in_command_does_not_truncate() {
        let m = extract("@claude mail ops@example.com when done").unwrap();
        assert_eq!(m.command, "mail ops@example.com when done");
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Claude".parse::<Provider>().unwrap(), Provider::Claude);
        assert!("gpt".parse::<Provider>().is_err());
    }

    #[test]
    fn test_prompt_contains_command_and_context() {
        let instruction = Instruction::new(
            extract("@claude add a LICENSE file").unwrap(),
            "Issue #1: License".to_string(),
            "main".to_string(),
        );
        let prompt = instruction.prompt();
        assert!(prompt.contains("add a LICENSE file"));
        assert!(prompt.contains("Issue #1: License"));
        assert!(prompt.contains("`main`"));
    }
}
