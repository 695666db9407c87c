//! Inbound repository events (GitLab webhook shape).
//!
//! Deliveries are discriminated by `object_kind`. Only `issue`,
//! `merge_request` and `note` are modelled; any other kind parses to `None`.

use serde::Deserialize;

use crate::progress::BOT_MARKER;
use crate::scm::{Noteable, Thread};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Issue,
    MergeRequest,
    Note,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::MergeRequest => "merge_request",
            Self::Note => "note",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRef {
    pub id: u64,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    pub git_http_url: String,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueAttributes {
    pub iid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestAttributes {
    pub iid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteAttributes {
    #[serde(default)]
    pub id: u64,
    pub note: String,
    pub noteable_type: String,
    #[serde(default)]
    pub discussion_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueEvent {
    pub project: ProjectRef,
    pub object_attributes: IssueAttributes,
    #[serde(default)]
    pub user: Option<Actor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestEvent {
    pub project: ProjectRef,
    pub object_attributes: MergeRequestAttributes,
    #[serde(default)]
    pub user: Option<Actor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteEvent {
    pub project: ProjectRef,
    pub object_attributes: NoteAttributes,
    #[serde(default)]
    pub issue: Option<IssueAttributes>,
    #[serde(default)]
    pub merge_request: Option<MergeRequestAttributes>,
    #[serde(default)]
    pub user: Option<Actor>,
}

/// One received repository event. Never mutated after parsing.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "object_kind", rename_all = "snake_case")]
pub enum InboundEvent {
    Issue(IssueEvent),
    MergeRequest(MergeRequestEvent),
    Note(NoteEvent),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    object_kind: Option<String>,
}

/// Parse a raw delivery. Unsupported `object_kind` values yield `Ok(None)`.
pub fn parse_event(body: &[u8]) -> Result<Option<InboundEvent>, serde_json::Error> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    match envelope.object_kind.as_deref() {
        Some("issue") | Some("merge_request") | Some("note") => {
            serde_json::from_slice(body).map(Some)
        }
        _ => Ok(None),
    }
}

/// Actions that represent new content worth scanning for a mention.
fn is_opening_action(action: Option<&str>) -> bool {
    matches!(action, None | Some("open") | Some("reopen"))
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Issue(_) => EventKind::Issue,
            Self::MergeRequest(_) => EventKind::MergeRequest,
            Self::Note(_) => EventKind::Note,
        }
    }

    pub fn project(&self) -> &ProjectRef {
        match self {
            Self::Issue(e) => &e.project,
            Self::MergeRequest(e) => &e.project,
            Self::Note(e) => &e.project,
        }
    }

    pub fn actor(&self) -> Option<&str> {
        let user = match self {
            Self::Issue(e) => e.user.as_ref(),
            Self::MergeRequest(e) => e.user.as_ref(),
            Self::Note(e) => e.user.as_ref(),
        };
        user.map(|u| u.username.as_str()).filter(|u| !u.is_empty())
    }

    /// Free text scanned for a provider mention.
    pub fn mention_text(&self) -> &str {
        match self {
            Self::Issue(e) => e.object_attributes.description.as_deref().unwrap_or(""),
            Self::MergeRequest(e) => e.object_attributes.description.as_deref().unwrap_or(""),
            Self::Note(e) => &e.object_attributes.note,
        }
    }

    /// Whether the event should be considered at all. Edits, closes and
    /// anything the agent wrote itself (status comments, opened merge
    /// requests) are skipped.
    pub fn is_actionable(&self) -> bool {
        if self.mention_text().contains(BOT_MARKER) {
            return false;
        }
        match self {
            Self::Issue(e) => is_opening_action(e.object_attributes.action.as_deref()),
            Self::MergeRequest(e) => is_opening_action(e.object_attributes.action.as_deref()),
            Self::Note(_) => true,
        }
    }

    /// Background handed to the agent alongside the command.
    pub fn context_text(&self) -> String {
        match self {
            Self::Issue(e) => describe_issue(&e.object_attributes),
            Self::MergeRequest(e) => describe_merge_request(&e.object_attributes),
            Self::Note(e) => match (&e.issue, &e.merge_request) {
                (_, Some(mr)) => describe_merge_request(mr),
                (Some(issue), None) => describe_issue(issue),
                (None, None) => String::new(),
            },
        }
    }

    /// Branch the agent should work against.
    pub fn execution_branch(&self) -> &str {
        match self {
            Self::Issue(e) => &e.project.default_branch,
            Self::MergeRequest(e) => &e.object_attributes.source_branch,
            Self::Note(e) => match &e.merge_request {
                Some(mr) if e.object_attributes.noteable_type == "MergeRequest" => {
                    &mr.source_branch
                }
                _ => &e.project.default_branch,
            },
        }
    }

    /// Conversation the status comment belongs to. `None` for notes on
    /// commits and snippets, which have nowhere to report to.
    pub fn thread(&self) -> Option<Thread> {
        let project_id = self.project().id;
        match self {
            Self::Issue(e) => Some(Thread {
                project_id,
                noteable: Noteable::Issue(e.object_attributes.iid),
                discussion_id: None,
            }),
            Self::MergeRequest(e) => Some(Thread {
                project_id,
                noteable: Noteable::MergeRequest(e.object_attributes.iid),
                discussion_id: None,
            }),
            Self::Note(e) => {
                let noteable = match e.object_attributes.noteable_type.as_str() {
                    "Issue" => Noteable::Issue(e.issue.as_ref()?.iid),
                    "MergeRequest" => Noteable::MergeRequest(e.merge_request.as_ref()?.iid),
                    _ => return None,
                };
                Some(Thread {
                    project_id,
                    noteable,
                    discussion_id: e.object_attributes.discussion_id.clone(),
                })
            }
        }
    }
}

fn describe_issue(issue: &IssueAttributes) -> String {
    let mut text = format!("Issue #{}: {}", issue.iid, issue.title);
    if let Some(description) = issue.description.as_deref().filter(|d| !d.trim().is_empty()) {
        text.push_str("\n\n");
        text.push_str(description.trim());
    }
    text
}

fn describe_merge_request(mr: &MergeRequestAttributes) -> String {
    let mut text = format!(
        "Merge request !{}: {} ({} -> {})",
        mr.iid, mr.title, mr.source_branch, mr.target_branch
    );
    if let Some(description) = mr.description.as_deref().filter(|d| !d.trim().is_empty()) {
        text.push_str("\n\n");
        text.push_str(description.trim());
    }
    text
}
