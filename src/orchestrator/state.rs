//! Run stages and results.

use serde::Serialize;

/// Pipeline stage a run is in. A failure is attributed to the stage that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Verifying,
    Extracting,
    PreparingWorkspace,
    RunningAgent,
    CollectingChanges,
    Publishing,
    Reporting,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verifying => "verifying",
            Self::Extracting => "extracting",
            Self::PreparingWorkspace => "preparing_workspace",
            Self::RunningAgent => "running_agent",
            Self::CollectingChanges => "collecting_changes",
            Self::Publishing => "publishing",
            Self::Reporting => "reporting",
        }
    }

    /// Phrase used in the status comment.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Verifying => "Verifying the request",
            Self::Extracting => "Reading the instruction",
            Self::PreparingWorkspace => "Preparing the workspace",
            Self::RunningAgent => "Running the agent",
            Self::CollectingChanges => "Collecting changes",
            Self::Publishing => "Publishing the changes",
            Self::Reporting => "Reporting",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub stage: RunStage,
    pub message: String,
}

impl RunFailure {
    pub fn new(stage: RunStage, error: impl std::fmt::Display) -> Self {
        Self {
            stage,
            message: error.to_string(),
        }
    }

    /// Text shown in the failure banner.
    pub fn render(&self) -> String {
        format!("{} failed: {}", self.stage.describe(), self.message)
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

/// How one run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Nothing to do: not actionable, no mention, or nowhere to report.
    Ignored,
    /// The agent finished but left the tree untouched.
    NoChanges,
    MergeRequestOpened { url: String, branch: String },
    Failed(RunFailure),
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;

    #[test]
    fn test_failure_render() {
        let failure = RunFailure::new(RunStage::RunningAgent, AgentError::TimedOut(60));
        assert_eq!(
            failure.render(),
            "Running the agent failed: Agent run timed out after 60 seconds"
        );
        assert_eq!(
            failure.to_string(),
            "running_agent: Agent run timed out after 60 seconds"
        );
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = RunOutcome::MergeRequestOpened {
            url: "https://gitlab.example.com/a/b/-/merge_requests/1".into(),
            branch: "agent/x".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "merge_request_opened");
        assert!(!outcome.is_failure());
        assert_eq!(
            serde_json::to_value(RunOutcome::Ignored).unwrap()["status"],
            "ignored"
        );
    }
}
