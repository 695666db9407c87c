//! Claude CLI transport (`--output-format stream-json`).

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::agent::process::{StreamDecoder, exit_failure, run_streaming};
use crate::agent::{
    AgentCommand, AgentOutcome, AgentRunOptions, AgentRunner, ProgressEvent, ProgressKind,
    TokenUsage, describe_tool_use, is_file_tool,
};
use crate::errors::AgentError;
use crate::instruction::Provider;
use crate::util::snippet;

/// Events from Claude CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },

    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },

    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug)]
struct FinalResult {
    subtype: String,
    text: Option<String>,
    is_error: bool,
}

#[derive(Debug, Default)]
struct ClaudeDecoder {
    result: Option<FinalResult>,
    last_text: Option<String>,
    usage: TokenUsage,
}

impl StreamDecoder for ClaudeDecoder {
    fn decode(&mut self, line: &str) -> Vec<ProgressEvent> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let event: StreamEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "skipping non-protocol line from claude");
                return Vec::new();
            }
        };

        match event {
            StreamEvent::System { subtype } => {
                tracing::debug!(%subtype, "claude session event");
                Vec::new()
            }
            StreamEvent::Assistant { message } => message
                .content
                .into_iter()
                .filter_map(|block| self.decode_block(block))
                .collect(),
            StreamEvent::User {} | StreamEvent::Other => Vec::new(),
            StreamEvent::Result {
                subtype,
                result,
                is_error,
                usage,
            } => {
                if let Some(usage) = usage {
                    self.usage.add(&usage);
                }
                self.result = Some(FinalResult {
                    subtype,
                    text: result,
                    is_error,
                });
                vec![ProgressEvent::new(
                    ProgressKind::TurnCompleted,
                    format!("Turn completed ({})", self.usage.summary()),
                )]
            }
        }
    }

    fn finish(&mut self, exit_ok: bool, stderr: &str) -> Result<AgentOutcome, AgentError> {
        match self.result.take() {
            Some(result) if result.is_error || result.subtype != "success" => {
                let reason = result
                    .text
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| format!("claude finished with status '{}'", result.subtype));
                Err(AgentError::Failed(reason))
            }
            Some(result) => Ok(AgentOutcome {
                output: result
                    .text
                    .filter(|t| !t.trim().is_empty())
                    .or_else(|| self.last_text.take())
                    .unwrap_or_default(),
                usage: self.usage,
            }),
            None if exit_ok => Ok(AgentOutcome {
                output: self.last_text.take().unwrap_or_default(),
                usage: self.usage,
            }),
            None => Err(exit_failure("claude", stderr)),
        }
    }
}

impl ClaudeDecoder {
    fn decode_block(&mut self, block: ContentBlock) -> Option<ProgressEvent> {
        match block {
            ContentBlock::Text { text } => {
                if text.trim().is_empty() {
                    return None;
                }
                let event = ProgressEvent::new(ProgressKind::Message, snippet(&text));
                self.last_text = Some(text);
                Some(event)
            }
            ContentBlock::Thinking { thinking } => {
                let text = snippet(&thinking);
                (!text.is_empty())
                    .then(|| ProgressEvent::new(ProgressKind::Thinking, format!("Thinking: {}", text)))
            }
            ContentBlock::ToolUse { name, input } => {
                let kind = if is_file_tool(&name) {
                    ProgressKind::FileChange
                } else {
                    ProgressKind::Tool
                };
                Some(ProgressEvent::new(kind, describe_tool_use(&name, &input)))
            }
            ContentBlock::Other => None,
        }
    }
}

/// Runs the Claude CLI non-interactively with permissions bypassed.
#[derive(Debug, Clone)]
pub struct ClaudeRunner {
    command: AgentCommand,
}

impl ClaudeRunner {
    pub fn new(command: AgentCommand) -> Self {
        Self { command }
    }

    fn build_args(prompt: &str, model: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = [
            "--print",
            "--verbose",
            "--output-format",
            "stream-json",
            "--dangerously-skip-permissions",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl AgentRunner for ClaudeRunner {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn run(
        &self,
        prompt: &str,
        workspace: &Path,
        options: AgentRunOptions,
    ) -> Result<AgentOutcome, AgentError> {
        let mut cmd = self.command.to_command(workspace);
        cmd.args(Self::build_args(prompt, options.model.as_deref()));
        run_streaming(cmd, &self.command.program, ClaudeDecoder::default(), &options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::{drain, fake_agent, terminal_count};
    use std::time::Duration;
    use tempfile::TempDir;

    fn script(lines: &[&str], exit: i32) -> String {
        let mut body = String::from("cat <<'EOF'\n");
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        body.push_str("EOF\n");
        body.push_str(&format!("exit {}\n", exit));
        body
    }

    #[test]
    fn test_parse_assistant_tool_use() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"/foo/bar.rs"},"id":"123"}]},"session_id":"abc"}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        let StreamEvent::Assistant { message } = event else {
            panic!("Expected Assistant event");
        };
        assert!(matches!(&message.content[0], ContentBlock::ToolUse { name, .. } if name == "Read"));
    }

    #[test]
    fn test_unknown_types_are_tolerated() {
        let event: StreamEvent = serde_json::from_str(r#"{"type":"stream_event","x":1}"#).unwrap();
        assert!(matches!(event, StreamEvent::Other));
        let block: ContentBlock = serde_json::from_str(r#"{"type":"redacted_thinking"}"#).unwrap();
        assert!(matches!(block, ContentBlock::Other));
    }

    #[test]
    fn test_decoder_normalises_progress() {
        let mut decoder = ClaudeDecoder::default();
        let events = decoder.decode(
            r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"Need a license file\nthen done"},{"type":"tool_use","name":"Write","input":{"file_path":"/ws/LICENSE"}},{"type":"tool_use","name":"Bash","input":{"command":"ls"}}]}}"#,
        );
        assert_eq!(
            events,
            vec![
                ProgressEvent::new(ProgressKind::Thinking, "Thinking: Need a license file"),
                ProgressEvent::new(ProgressKind::FileChange, "Creating: ws/LICENSE"),
                ProgressEvent::new(ProgressKind::Tool, "Running: ls"),
            ]
        );
        assert!(decoder.decode("not json").is_empty());
    }

    #[test]
    fn test_result_text_wins_over_last_message() {
        let mut decoder = ClaudeDecoder::default();
        decoder.decode(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"interim"}]}}"#);
        decoder.decode(r#"{"type":"result","subtype":"success","is_error":false,"result":"Added LICENSE","usage":{"input_tokens":12,"output_tokens":3,"cache_read_input_tokens":7}}"#);
        let outcome = decoder.finish(true, "").unwrap();
        assert_eq!(outcome.output, "Added LICENSE");
        assert_eq!(outcome.usage.cached_input_tokens, 7);
    }

    #[test]
    fn test_last_message_used_without_result_text() {
        let mut decoder = ClaudeDecoder::default();
        decoder.decode(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"All done"}]}}"#);
        decoder.decode(r#"{"type":"result","subtype":"success","is_error":false}"#);
        assert_eq!(decoder.finish(true, "").unwrap().output, "All done");
    }

    #[test]
    fn test_error_result_fails() {
        let mut decoder = ClaudeDecoder::default();
        decoder.decode(r#"{"type":"result","subtype":"error_max_turns","is_error":true}"#);
        let err = decoder.finish(true, "").unwrap_err();
        assert_eq!(
            err,
            AgentError::Failed("claude finished with status 'error_max_turns'".into())
        );
    }

    #[test]
    fn test_build_args() {
        let args = ClaudeRunner::build_args("do it", Some("opus"));
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--model" && w[1] == "opus"));
        assert_eq!(args.last().unwrap(), "do it");
    }

    #[tokio::test]
    async fn test_runner_against_fake_cli() {
        let tmp = TempDir::new().unwrap();
        let body = script(
            &[
                r#"{"type":"system","subtype":"init"}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Write","input":{"file_path":"LICENSE"}}]}}"#,
                r#"{"type":"user","message":{"content":[]}}"#,
                r#"{"type":"result","subtype":"success","is_error":false,"result":"Created LICENSE","usage":{"input_tokens":5,"output_tokens":2}}"#,
            ],
            0,
        );
        let runner = ClaudeRunner::new(fake_agent(tmp.path(), "claude.sh", &body));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut options = AgentRunOptions::new(Duration::from_secs(10));
        options.progress = Some(tx);

        let outcome = runner.run("add a license", tmp.path(), options).await.unwrap();
        assert_eq!(outcome.output, "Created LICENSE");
        assert_eq!(outcome.usage.output_tokens, 2);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| e.kind == ProgressKind::FileChange));
        assert!(events.iter().any(|e| e.kind == ProgressKind::TurnCompleted));
        assert_eq!(terminal_count(&events), 1);
    }

    #[tokio::test]
    async fn test_runner_error_result() {
        let tmp = TempDir::new().unwrap();
        let body = script(
            &[r#"{"type":"result","subtype":"error_during_execution","is_error":true,"result":"API overloaded"}"#],
            1,
        );
        let runner = ClaudeRunner::new(fake_agent(tmp.path(), "claude.sh", &body));
        let err = runner
            .run("x", tmp.path(), AgentRunOptions::new(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Failed("API overloaded".into()));
    }
}
