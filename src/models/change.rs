//! Classification verdicts and field-level change sets.

use std::collections::BTreeSet;

/// Verdict of comparing a fetched post with its last stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    Modified,
    Unchanged,
}

impl Classification {
    pub fn is_new(self) -> bool {
        matches!(self, Self::New)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Unchanged => "unchanged",
        }
    }
}

/// What changed between two versions of a post.
///
/// Built once per `Modified` verdict and never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// `'old' -> 'new'` when the title differs
    pub title: Option<String>,

    /// One-sentence description of the body change
    pub content_summary: Option<String>,

    /// Previous body, present only with a material textual change
    pub raw_old_body: Option<String>,

    /// Current body, present only with a material textual change
    pub raw_new_body: Option<String>,

    pub images_changed: bool,

    pub attachments_added: BTreeSet<String>,
    pub attachments_removed: BTreeSet<String>,

    /// Coarse flag set whenever any attachment key differs
    pub attachments_changed: bool,
}

impl ChangeSet {
    /// True when nothing user-visible changed.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content_summary.is_none()
            && self.raw_old_body.is_none()
            && !self.images_changed
            && !self.attachments_changed
            && self.attachments_added.is_empty()
            && self.attachments_removed.is_empty()
    }

    /// Whether an attachment was added, removed or replaced.
    pub fn attachments_touched(&self) -> bool {
        self.attachments_changed
            || !self.attachments_added.is_empty()
            || !self.attachments_removed.is_empty()
    }

    /// Old and new body when a line diff is worth rendering.
    pub fn raw_bodies(&self) -> Option<(&str, &str)> {
        match (&self.raw_old_body, &self.raw_new_body) {
            (Some(old), Some(new)) => Some((old.as_str(), new.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_change_set() {
        let changes = ChangeSet::default();
        assert!(changes.is_empty());
        assert!(!changes.attachments_touched());
        assert!(changes.raw_bodies().is_none());
    }

    #[test]
    fn test_attachment_changes_are_not_empty() {
        let changes = ChangeSet {
            attachments_added: BTreeSet::from(["b.pdf".to_string()]),
            attachments_changed: true,
            ..Default::default()
        };
        assert!(!changes.is_empty());
        assert!(changes.attachments_touched());
    }
}
