//! One run per accepted event: instruction → workspace → agent → changes →
//! merge request, reported into a single status comment.
//!
//! Every run owns its `Orchestrator`, its `ProgressReporter` and its
//! `WorkspaceLease`; the only shared pieces are the immutable `Services`.
//! The workspace is always cleaned up before the terminal report is posted,
//! and the terminal report is posted exactly once, also when the pipeline
//! panics.

pub mod state;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{AgentRegistry, AgentRunOptions, ProgressKind};
use crate::compose;
use crate::config::Config;
use crate::errors::PublishError;
use crate::instruction::Instruction;
use crate::models::{ChangeKind, ChangeSet};
use crate::progress::{DEFAULT_MAX_ENTRIES, ProgressLog, ProgressReporter};
use crate::scm::{GitLabClient, ScmClient};
use crate::util::{slugify, snippet, truncate_str};
use crate::webhook::{InboundEvent, ProjectRef};
use crate::workspace::{self, WorkspaceLease, WorkspaceManager};

pub use state::{RunFailure, RunOutcome, RunStage};

const BRANCH_SLUG_LEN: usize = 40;
/// Largest patch embedded in a failure comment.
const MAX_PATCH_CHARS: usize = 60_000;

/// Collaborators shared by every run.
pub struct Services {
    pub config: Arc<Config>,
    pub workspace: Arc<WorkspaceManager>,
    pub agents: Arc<AgentRegistry>,
    pub scm: Arc<dyn ScmClient>,
    /// Cancelled on shutdown; each run's agent gets a child token.
    pub shutdown: CancellationToken,
}

impl Services {
    /// Wire the production collaborators from configuration.
    pub fn from_config(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let scm = GitLabClient::new(&config.gitlab.url, config.gitlab.token.clone())
            .context("Failed to create GitLab client")?;
        let workspace = WorkspaceManager::new(
            config.workspace.root.clone(),
            Some(config.gitlab.token.clone()),
            config.workspace.identity(),
        )
        .with_clone_depth(config.workspace.clone_depth);
        let agents = AgentRegistry::from_config(&config.agent);

        Ok(Self {
            config: Arc::new(config),
            workspace: Arc::new(workspace),
            agents: Arc::new(agents),
            scm: Arc::new(scm),
            shutdown,
        })
    }
}

/// What a successful pipeline produced, before it is reported.
#[derive(Debug)]
enum Delivery {
    NoChanges,
    MergeRequest {
        url: String,
        branch: String,
        summary: String,
    },
}

/// Drives one event through the pipeline.
pub struct Orchestrator {
    services: Arc<Services>,
    run_id: Uuid,
    /// Stage currently executing; a panic is attributed to it.
    stage: Mutex<RunStage>,
}

impl Orchestrator {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            run_id: Uuid::new_v4(),
            stage: Mutex::new(RunStage::Verifying),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn enter(&self, stage: RunStage) {
        if let Ok(mut current) = self.stage.lock() {
            *current = stage;
        }
    }

    fn stage(&self) -> RunStage {
        self.stage
            .lock()
            .map(|stage| *stage)
            .unwrap_or(RunStage::Reporting)
    }

    /// Handle one authenticated event to completion. Never fails: every
    /// failure ends up in the status comment and the returned outcome.
    pub async fn handle(self, event: InboundEvent) -> RunOutcome {
        let span = tracing::info_span!(
            "run",
            run_id = %self.run_id,
            project_id = event.project().id,
            kind = %event.kind(),
        );
        self.execute(event).instrument(span).await
    }

    async fn execute(&self, event: InboundEvent) -> RunOutcome {
        self.enter(RunStage::Extracting);
        if !event.is_actionable() {
            tracing::debug!("event not actionable");
            return RunOutcome::Ignored;
        }
        let Some(instruction) = Instruction::from_event(&event) else {
            tracing::debug!("no instruction in event");
            return RunOutcome::Ignored;
        };
        let Some(thread) = event.thread() else {
            tracing::info!("instruction found but the event has no thread to report into");
            return RunOutcome::Ignored;
        };

        tracing::info!(
            provider = %instruction.provider,
            actor = event.actor().unwrap_or("unknown"),
            branch = %instruction.target_branch,
            "instruction accepted"
        );

        let header = format!(
            "**{}** is working on: _{}_",
            instruction.provider.display_name(),
            truncate_str(&snippet(&instruction.command), 100)
        );
        let mut reporter = ProgressReporter::new(
            Arc::clone(&self.services.scm),
            thread,
            ProgressLog::new(header, DEFAULT_MAX_ENTRIES),
        );
        reporter.start("Instruction received").await;

        // A panic drops the lease, which removes the workspace, before the
        // failure is reported.
        let pipeline = self.pipeline(&instruction, event.project(), &mut reporter);
        let result = match AssertUnwindSafe(pipeline).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let stage = self.stage();
                let message = panic_message(panic.as_ref());
                tracing::error!(%stage, panic = %message, "run panicked");
                Err(RunFailure::new(stage, format!("internal error: {}", message)))
            }
        };

        self.enter(RunStage::Reporting);
        self.report(&mut reporter, result).await
    }

    /// Workspace lifetime around the agent run and publication.
    async fn pipeline(
        &self,
        instruction: &Instruction,
        project: &ProjectRef,
        reporter: &mut ProgressReporter,
    ) -> Result<Delivery, RunFailure> {
        self.enter(RunStage::PreparingWorkspace);
        reporter
            .update(&format!(
                "Preparing workspace on `{}`",
                instruction.target_branch
            ))
            .await;
        let lease = self
            .services
            .workspace
            .prepare(project, &instruction.target_branch)
            .await
            .map_err(|e| RunFailure::new(RunStage::PreparingWorkspace, e))?;

        let result = self.work(instruction, project, &lease, reporter).await;
        self.services.workspace.cleanup(lease).await;
        result
    }

    /// Agent run and publication against a prepared workspace.
    async fn work(
        &self,
        instruction: &Instruction,
        project: &ProjectRef,
        lease: &WorkspaceLease,
        reporter: &mut ProgressReporter,
    ) -> Result<Delivery, RunFailure> {
        self.enter(RunStage::RunningAgent);
        self.run_agent(instruction, lease, reporter).await?;

        self.enter(RunStage::CollectingChanges);
        let changes = workspace::changed_files(lease.path())
            .map_err(|e| RunFailure::new(RunStage::CollectingChanges, e))?;
        tracing::info!(files = changes.len(), stage = %RunStage::CollectingChanges, "changes collected");
        if changes.is_empty() {
            return Ok(Delivery::NoChanges);
        }
        reporter
            .update(&format!("{} file(s) changed", changes.len()))
            .await;

        self.enter(RunStage::Publishing);
        self.publish(instruction, project, lease, &changes, reporter)
            .await
    }

    async fn run_agent(
        &self,
        instruction: &Instruction,
        lease: &WorkspaceLease,
        reporter: &mut ProgressReporter,
    ) -> Result<(), RunFailure> {
        let runner = self
            .services
            .agents
            .get(instruction.provider)
            .map_err(|e| RunFailure::new(RunStage::RunningAgent, e))?;

        let timeout = self
            .services
            .config
            .agent
            .timeout_for(instruction.timeout_secs);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut options = AgentRunOptions::new(timeout);
        options.model = instruction.model.clone();
        options.cancel = self.services.shutdown.child_token();
        options.progress = Some(tx);

        tracing::info!(
            provider = %runner.provider(),
            timeout_secs = timeout.as_secs(),
            stage = %RunStage::RunningAgent,
            "starting agent"
        );
        reporter
            .update(&format!(
                "Running {} (timeout {}s)",
                runner.provider().display_name(),
                timeout.as_secs()
            ))
            .await;

        let prompt = instruction.prompt();
        let run = runner.run(&prompt, lease.path(), options);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Some(event) = rx.recv() => {
                    if event.kind != ProgressKind::Terminal {
                        reporter.update(&event.message).await;
                    }
                }
            }
        };
        while let Ok(event) = rx.try_recv() {
            if event.kind != ProgressKind::Terminal {
                reporter.update(&event.message).await;
            }
        }

        let outcome = result.map_err(|e| RunFailure::new(RunStage::RunningAgent, e))?;
        tracing::info!(
            input_tokens = outcome.usage.input_tokens,
            output_tokens = outcome.usage.output_tokens,
            "agent finished"
        );
        let summary = snippet(&outcome.output);
        if summary.is_empty() {
            reporter.update("Agent finished").await;
        } else {
            reporter
                .update(&format!("Agent finished: {}", summary))
                .await;
        }
        Ok(())
    }

    async fn publish(
        &self,
        instruction: &Instruction,
        project: &ProjectRef,
        lease: &WorkspaceLease,
        changes: &ChangeSet,
        reporter: &mut ProgressReporter,
    ) -> Result<Delivery, RunFailure> {
        let branch = branch_name(
            &self.services.config.workspace.branch_prefix,
            instruction,
            self.run_id,
        );
        let target = lease.base_branch();
        let draft = compose::compose(
            &instruction.command,
            changes,
            &instruction.context,
            &branch,
            target,
        );
        let failure = |e: PublishError, patch: Option<String>| {
            let hint = e.recovery_hint(target);
            let mut message = format!("{}\n\n{}", e, hint);
            if let Some(patch) = patch {
                message.push_str(&patch_details(&patch));
            }
            RunFailure::new(RunStage::Publishing, message)
        };

        let base_sha = workspace::head_commit(lease.path())
            .map_err(|e| RunFailure::new(RunStage::Publishing, e))?;
        if let Err(source) = self
            .services
            .scm
            .create_branch(project.id, &branch, &base_sha)
            .await
        {
            let patch = self.salvage_patch(lease, &base_sha).await;
            let error = PublishError::Branch {
                branch: branch.clone(),
                source,
            };
            return Err(failure(error, patch));
        }

        let pushed = match self
            .services
            .workspace
            .create_and_push_branch(lease.path(), &branch, &draft.commit_message)
            .await
        {
            Ok(pushed) => pushed,
            Err(source) => {
                self.discard_branch(project, &branch).await;
                let patch = self.salvage_patch(lease, &base_sha).await;
                let error = PublishError::Push {
                    branch: branch.clone(),
                    source,
                };
                return Err(failure(error, patch));
            }
        };
        if !pushed {
            tracing::info!(%branch, "nothing staged after agent run");
            self.discard_branch(project, &branch).await;
            return Ok(Delivery::NoChanges);
        }
        reporter.update(&format!("Pushed branch `{}`", branch)).await;

        let merge_request = self
            .services
            .scm
            .create_merge_request(project.id, &draft)
            .await
            .map_err(|source| {
                let error = PublishError::MergeRequest {
                    branch: branch.clone(),
                    source,
                };
                failure(error, None)
            })?;
        tracing::info!(url = %merge_request.web_url, %branch, "merge request opened");

        Ok(Delivery::MergeRequest {
            url: merge_request.web_url,
            branch,
            summary: change_summary(changes),
        })
    }

    /// The agent's work as a patch against `base`, if it can still be read.
    async fn salvage_patch(&self, lease: &WorkspaceLease, base: &str) -> Option<String> {
        match self.services.workspace.export_patch(lease.path(), base).await {
            Ok(patch) if !patch.trim().is_empty() => Some(patch),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to export the agent's changes");
                None
            }
        }
    }

    /// Best-effort removal of the API-created branch when nothing reached it.
    async fn discard_branch(&self, project: &ProjectRef, branch: &str) {
        if let Err(e) = self.services.scm.delete_branch(project.id, branch).await {
            tracing::warn!(%branch, error = %e, "failed to delete unused branch");
        }
    }

    /// Post the terminal banner. Runs once per reported run.
    async fn report(
        &self,
        reporter: &mut ProgressReporter,
        result: Result<Delivery, RunFailure>,
    ) -> RunOutcome {
        match result {
            Ok(Delivery::NoChanges) => {
                reporter
                    .succeed("The agent made no file changes, so no merge request was opened.")
                    .await;
                RunOutcome::NoChanges
            }
            Ok(Delivery::MergeRequest {
                url,
                branch,
                summary,
            }) => {
                reporter
                    .succeed(format!(
                        "Opened merge request {} from `{}` ({}).",
                        url, branch, summary
                    ))
                    .await;
                RunOutcome::MergeRequestOpened { url, branch }
            }
            Err(failure) => {
                tracing::error!(stage = %failure.stage, error = %failure.message, "run failed");
                reporter.fail(failure.render()).await;
                RunOutcome::Failed(failure)
            }
        }
    }
}

/// "2 created, 1 modified"; kinds with no files are left out.
pub fn change_summary(changes: &ChangeSet) -> String {
    let parts: Vec<String> = [ChangeKind::Created, ChangeKind::Modified, ChangeKind::Deleted]
        .into_iter()
        .filter_map(|kind| match changes.count(kind) {
            0 => None,
            n => Some(format!("{} {}", n, kind)),
        })
        .collect();
    if parts.is_empty() {
        "no files changed".to_string()
    } else {
        parts.join(", ")
    }
}

/// Collapsible block holding a patch, cut to `MAX_PATCH_CHARS`.
fn patch_details(patch: &str) -> String {
    let total = patch.chars().count();
    let (body, note) = if total > MAX_PATCH_CHARS {
        let kept: String = patch.chars().take(MAX_PATCH_CHARS).collect();
        (
            kept,
            format!(
                "\n_Patch truncated to {} of {} characters; it will not apply as is._\n",
                MAX_PATCH_CHARS, total
            ),
        )
    } else {
        (patch.to_string(), String::new())
    };
    format!(
        "\n\n<details><summary>Agent changes (patch)</summary>\n\n```diff\n{}\n```\n{}\n</details>",
        body.trim_end(),
        note
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

/// `<prefix>/<provider>-<slug>-<8 hex>`; the suffix keeps concurrent runs
/// on the same command apart.
pub fn branch_name(prefix: &str, instruction: &Instruction, run_id: Uuid) -> String {
    let mut slug = slugify(&instruction.command, BRANCH_SLUG_LEN);
    if slug.is_empty() {
        slug = "changes".to_string();
    }
    let id = run_id.simple().to_string();
    let prefix = prefix.trim_matches('/');
    let name = format!("{}-{}-{}", instruction.provider, slug, &id[..8]);
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix, name)
    }
}
