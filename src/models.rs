use serde::Serialize;

/// How a path differs from the checked-out commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
}

impl FileChange {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Snapshot of the working tree changes after an agent run, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet(Vec<FileChange>);

impl ChangeSet {
    pub fn new(mut changes: Vec<FileChange>) -> Self {
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes.dedup_by(|a, b| a.path == b.path);
        Self(changes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileChange> {
        self.0.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|c| c.path.as_str())
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.0.iter().filter(|c| c.kind == kind).count()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a FileChange;
    type IntoIter = std::slice::Iter<'a, FileChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Everything needed to commit and open a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeRequestDraft {
    pub title: String,
    pub commit_message: String,
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_set_sorted_and_deduplicated() {
        let set = ChangeSet::new(vec![
            FileChange::new("src/b.rs", ChangeKind::Modified),
            FileChange::new("LICENSE", ChangeKind::Created),
            FileChange::new("src/b.rs", ChangeKind::Modified),
            FileChange::new("src/a.rs", ChangeKind::Deleted),
        ]);
        let paths: Vec<&str> = set.paths().collect();
        assert_eq!(paths, vec!["LICENSE", "src/a.rs", "src/b.rs"]);
        assert_eq!(set.count(ChangeKind::Modified), 1);
    }

    #[test]
    fn test_change_kind_serializes_lowercase() {
        let json = serde_json::to_string(&FileChange::new("a", ChangeKind::Deleted)).unwrap();
        assert_eq!(json, r#"{"path":"a","kind":"deleted"}"#);
    }
}
