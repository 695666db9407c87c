//! Child-process driver shared by the agent transports.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::agent::{
    AgentOutcome, AgentRunOptions, ErrorLatch, ProgressEvent, ProgressKind, ProgressThrottle,
};
use crate::errors::AgentError;

const STDERR_TAIL: usize = 2000;
const STDERR_GRACE: Duration = Duration::from_secs(5);

/// Program plus leading arguments, e.g. `claude` or `npx codex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl AgentCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Split a whitespace-separated command line. Empty input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(String::from).collect(),
        })
    }

    pub(crate) fn to_command(&self, workspace: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(workspace);
        cmd
    }
}

/// Protocol-specific half of a transport.
pub trait StreamDecoder: Send {
    /// Translate one stdout line into zero or more progress events.
    fn decode(&mut self, line: &str) -> Vec<ProgressEvent>;

    /// Produce the final outcome once stdout is exhausted.
    fn finish(&mut self, exit_ok: bool, stderr: &str) -> Result<AgentOutcome, AgentError>;
}

/// Spawn `cmd`, stream its stdout through `decoder` and enforce the timeout
/// and cancellation in `options`.
///
/// Exactly one `Terminal` progress event is sent per call, and the first
/// failure wins: once a timeout or cancellation is latched, the killed
/// process's exit status is not reported again.
pub async fn run_streaming<D: StreamDecoder>(
    mut cmd: Command,
    program: &str,
    mut decoder: D,
    options: &AgentRunOptions,
) -> Result<AgentOutcome, AgentError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut throttle = ProgressThrottle::default();
    let mut latch = ErrorLatch::default();

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let error = AgentError::Unavailable(format!("failed to spawn {}: {}", program, e));
            return Err(terminal_error(options, &mut throttle, error));
        }
    };

    let Some(stdout) = child.stdout.take() else {
        let error = AgentError::Unavailable(format!("stdout of {} was not captured", program));
        return Err(terminal_error(options, &mut throttle, error));
    };
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_tail(s)));

    let mut reader = BufReader::new(stdout);

    let deadline = tokio::time::sleep(options.timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                latch.report(AgentError::TimedOut(options.timeout.as_secs()));
                break;
            }
            _ = options.cancel.cancelled() => {
                latch.report(AgentError::Cancelled);
                break;
            }
            line = next_line(&mut reader) => match line {
                Ok(Some(line)) => {
                    for event in decoder.decode(&line) {
                        emit(options, &mut throttle, event);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(program, error = %e, "failed to read agent output");
                    break;
                }
            },
        }
    }

    if latch.is_reported() {
        if let Err(e) = child.start_kill() {
            tracing::warn!(program, error = %e, "failed to kill agent process");
        }
        // Reap the process; its exit status is a consequence of the kill.
        if let Err(e) = child.wait().await {
            latch.report(AgentError::Failed(e.to_string()));
        }
        if let Some(task) = stderr_task {
            task.abort();
        }
    } else {
        // Stdout can close before the process exits; the deadline still applies.
        let exit_ok = match tokio::time::timeout_at(deadline.deadline(), child.wait()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                latch.report(AgentError::Failed(format!("failed to wait for {}: {}", program, e)));
                false
            }
            Err(_) => {
                latch.report(AgentError::TimedOut(options.timeout.as_secs()));
                let _ = child.start_kill();
                let _ = child.wait().await;
                false
            }
        };
        let stderr = match stderr_task {
            Some(task) => tokio::time::timeout(STDERR_GRACE, task)
                .await
                .ok()
                .and_then(|joined| joined.ok())
                .unwrap_or_default(),
            None => String::new(),
        };
        if !latch.is_reported() {
            match decoder.finish(exit_ok, &stderr) {
                Ok(outcome) => {
                    emit(
                        options,
                        &mut throttle,
                        ProgressEvent::new(ProgressKind::Terminal, "Agent finished"),
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    latch.report(e);
                }
            }
        }
    }

    let error = latch
        .into_error()
        .unwrap_or_else(|| AgentError::Failed("agent stopped without a result".to_string()));
    Err(terminal_error(options, &mut throttle, error))
}

fn terminal_error(
    options: &AgentRunOptions,
    throttle: &mut ProgressThrottle,
    error: AgentError,
) -> AgentError {
    emit(
        options,
        throttle,
        ProgressEvent::new(ProgressKind::Terminal, error.to_string()),
    );
    error
}

fn emit(options: &AgentRunOptions, throttle: &mut ProgressThrottle, event: ProgressEvent) {
    let Some(tx) = &options.progress else {
        return;
    };
    if throttle.admit(&event) {
        // The receiver going away only means nobody is watching.
        let _ = tx.send(event);
    }
}

/// Next newline-terminated line, decoded lossily so a stray invalid byte
/// does not end the stream. `None` at end of input.
async fn next_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Read a stream to the end, keeping only its last `STDERR_TAIL` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "failed to read agent stderr");
    }
    let start = buf.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&buf[start..]).trim().to_string()
}

/// Failure reason for a process that exited unsuccessfully without a
/// protocol-level error.
pub(crate) fn exit_failure(program: &str, stderr: &str) -> AgentError {
    if stderr.is_empty() {
        AgentError::Failed(format!("{} exited with non-zero status", program))
    } else {
        AgentError::Failed(stderr.to_string())
    }
}
