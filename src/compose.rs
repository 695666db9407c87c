//! Merge request composition from an instruction and its change set.
//!
//! Everything here is pure and deterministic: the same inputs always give
//! the same draft.

use crate::models::{ChangeSet, MergeRequestDraft};
use crate::progress::BOT_MARKER;
use crate::util::truncate_str;

pub const MAX_TITLE_LEN: usize = 72;

/// Leading directories that say nothing about what changed.
const GENERIC_ROOTS: &[&str] = &["src", "lib", "app", "pkg", "crates", "packages"];

const FIX_WORDS: &[&str] = &[
    "fix", "fixes", "fixed", "bug", "bugs", "error", "errors", "crash", "crashes", "broken",
];
const TEST_WORDS: &[&str] = &["test", "tests", "spec", "specs"];
const REFACTOR_WORDS: &[&str] = &["refactor", "refactoring", "cleanup", "rename"];
const DOCS_WORDS: &[&str] = &["doc", "docs", "readme", "documentation"];
const FEAT_WORDS: &[&str] = &["add", "adds", "implement", "create", "feature", "support"];

/// Conventional-commit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitType {
    Feat,
    Fix,
    Docs,
    Test,
    Refactor,
    Chore,
}

impl CommitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feat => "feat",
            Self::Fix => "fix",
            Self::Docs => "docs",
            Self::Test => "test",
            Self::Refactor => "refactor",
            Self::Chore => "chore",
        }
    }

    fn checklist(&self) -> &'static [&'static str] {
        match self {
            Self::Feat => &[
                "Exercise the new behaviour manually",
                "Add or update tests covering the feature",
                "Check that documentation mentions the change",
            ],
            Self::Fix => &[
                "Reproduce the original problem and confirm it no longer occurs",
                "Add a regression test",
                "Check related code paths for the same defect",
            ],
            Self::Docs => &[
                "Proofread the rendered documentation",
                "Check links and code samples",
            ],
            Self::Test => &[
                "Run the test suite and confirm the new tests pass",
                "Confirm the tests fail without the code they cover",
            ],
            Self::Refactor => &[
                "Run the full test suite; behaviour must be unchanged",
                "Review for accidental public API changes",
            ],
            Self::Chore => &[
                "Run the build and the test suite",
                "Review the changed files for unintended edits",
            ],
        }
    }
}

impl std::fmt::Display for CommitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn is_docs_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.starts_with("docs/")
        || lower.starts_with("doc/")
        || lower.ends_with(".md")
        || lower.ends_with(".markdown")
}

/// Pick the commit type from instruction keywords, falling back to the shape
/// of the change set.
pub fn classify(instruction: &str, changes: &ChangeSet) -> CommitType {
    let words = words(instruction);
    let has = |set: &[&str]| words.iter().any(|w| set.contains(&w.as_str()));
    let has_clean_up = words.windows(2).any(|w| w[0] == "clean" && w[1] == "up");

    if has(FIX_WORDS) {
        CommitType::Fix
    } else if has(TEST_WORDS) {
        CommitType::Test
    } else if has(REFACTOR_WORDS) || has_clean_up {
        CommitType::Refactor
    } else if has(DOCS_WORDS) || (!changes.is_empty() && changes.paths().all(is_docs_path)) {
        CommitType::Docs
    } else if has(FEAT_WORDS) {
        CommitType::Feat
    } else {
        CommitType::Chore
    }
}

/// First meaningful directory shared by every changed file.
///
/// `None` when a file sits at the repository root, when files live under
/// different top-level directories, or when only generic roots are shared.
pub fn scope(changes: &ChangeSet) -> Option<String> {
    let mut common: Option<Vec<&str>> = None;
    for path in changes.paths() {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        segments.pop();
        if segments.is_empty() {
            return None;
        }
        common = Some(match common {
            None => segments,
            Some(prev) => prev
                .iter()
                .zip(segments.iter())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| *a)
                .collect(),
        });
    }

    common?
        .into_iter()
        .find(|s| !GENERIC_ROOTS.contains(s))
        .map(str::to_string)
}

/// First non-blank line, trailing period removed, first letter lowercased.
pub fn summarize(instruction: &str) -> String {
    let line = instruction
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .trim_end_matches('.')
        .trim();
    if line.is_empty() {
        return "apply requested changes".to_string();
    }
    let mut chars = line.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn title(commit_type: CommitType, scope: Option<&str>, summary: &str) -> String {
    let prefix = match scope {
        Some(scope) => format!("{}({}): ", commit_type, scope),
        None => format!("{}: ", commit_type),
    };
    let room = MAX_TITLE_LEN.saturating_sub(prefix.chars().count());
    format!("{}{}", prefix, truncate_str(summary, room))
}

/// Build the full merge request draft.
pub fn compose(
    instruction: &str,
    changes: &ChangeSet,
    context: &str,
    source_branch: &str,
    target_branch: &str,
) -> MergeRequestDraft {
    let commit_type = classify(instruction, changes);
    let scope = scope(changes);
    let title = title(commit_type, scope.as_deref(), &summarize(instruction));

    let mut commit_message = format!("{}\n\n", title);
    for change in changes {
        commit_message.push_str(&format!("- {}: {}\n", change.kind, change.path));
    }

    let mut description = String::new();
    description.push_str("## Summary\n\n");
    description.push_str(instruction.trim());
    description.push_str("\n\n");

    if !context.trim().is_empty() {
        description.push_str("## Context\n\n");
        for line in context.trim().lines() {
            description.push_str("> ");
            description.push_str(line);
            description.push('\n');
        }
        description.push('\n');
    }

    description.push_str(&format!("## Changes ({} files)\n\n", changes.len()));
    description.push_str("| File | Change |\n|------|--------|\n");
    for change in changes {
        description.push_str(&format!("| `{}` | {} |\n", change.path, change.kind));
    }
    description.push('\n');

    description.push_str("## Testing\n\n");
    for item in commit_type.checklist() {
        description.push_str(&format!("- [ ] {}\n", item));
    }
    description.push_str(&format!(
        "\n---\nOpened automatically from `{}` into `{}`.\n{}\n",
        source_branch, target_branch, BOT_MARKER
    ));

    MergeRequestDraft {
        title,
        commit_message: commit_message.trim_end().to_string(),
        description,
        source_branch: source_branch.to_string(),
        target_branch: target_branch.to_string(),
    }
}
