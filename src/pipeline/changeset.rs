//! Field-level change sets for modified posts.

use std::collections::{BTreeSet, HashMap};

use crate::models::{Attachment, ChangeSet, Post};
use crate::services::{DiffSummary, Summarizer};

/// Builds a [`ChangeSet`] from the stored and fetched versions of a post.
pub struct ChangeSetBuilder<'a> {
    summarizer: Option<&'a dyn Summarizer>,
    placeholder: String,
}

impl<'a> ChangeSetBuilder<'a> {
    /// `placeholder` is used as the content summary whenever the
    /// summarizer is missing or fails.
    pub fn new(summarizer: Option<&'a dyn Summarizer>, placeholder: impl Into<String>) -> Self {
        Self {
            summarizer,
            placeholder: placeholder.into(),
        }
    }

    pub async fn build(&self, fetched: &Post, stored: &Post) -> ChangeSet {
        let mut changes = ChangeSet::default();

        if fetched.title != stored.title {
            changes.title = Some(format!("'{}' -> '{}'", stored.title, fetched.title));
        }

        if fetched.body.trim() != stored.body.trim() {
            self.describe_body(&mut changes, &stored.body, &fetched.body)
                .await;
        }

        let old_images: BTreeSet<&str> = stored.images.iter().map(String::as_str).collect();
        let new_images: BTreeSet<&str> = fetched.images.iter().map(String::as_str).collect();
        changes.images_changed = old_images != new_images;

        diff_attachments(&mut changes, &stored.attachments, &fetched.attachments);

        changes
    }

    async fn describe_body(&self, changes: &mut ChangeSet, old: &str, new: &str) {
        let summary = match self.summarizer {
            Some(summarizer) => match summarizer.summarize_diff(old, new).await {
                Ok(DiffSummary::NoChange) => {
                    log::debug!("Summarizer reports no material body change");
                    return;
                }
                Ok(DiffSummary::Changed(text)) => text,
                Err(e) => {
                    log::warn!("Diff summary unavailable, using placeholder: {}", e);
                    self.placeholder.clone()
                }
            },
            None => self.placeholder.clone(),
        };

        changes.content_summary = Some(summary);
        changes.raw_old_body = Some(old.to_string());
        changes.raw_new_body = Some(new.to_string());
    }
}

/// Compare attachments by `{name}_{size or 0}` keys.
///
/// A name on both sides of the difference is a replacement and is listed as
/// both added and removed. A same-key attachment whose URL moved is reported
/// the same way.
fn diff_attachments(changes: &mut ChangeSet, old: &[Attachment], new: &[Attachment]) {
    let old_keys: HashMap<String, &Attachment> =
        old.iter().map(|a| (a.change_key(), a)).collect();
    let new_keys: HashMap<String, &Attachment> =
        new.iter().map(|a| (a.change_key(), a)).collect();

    for (key, att) in &new_keys {
        match old_keys.get(key) {
            None => {
                changes.attachments_added.insert(att.name.clone());
            }
            Some(previous) if previous.url != att.url => {
                changes.attachments_added.insert(att.name.clone());
                changes.attachments_removed.insert(att.name.clone());
            }
            Some(_) => {}
        }
    }
    for (key, att) in &old_keys {
        if !new_keys.contains_key(key) {
            changes.attachments_removed.insert(att.name.clone());
        }
    }

    changes.attachments_changed =
        !changes.attachments_added.is_empty() || !changes.attachments_removed.is_empty();
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{AppError, Result};

    struct FixedSummarizer {
        answer: Mutex<Option<Result<DiffSummary>>>,
        calls: Mutex<usize>,
    }

    impl FixedSummarizer {
        fn new(answer: Result<DiffSummary>) -> Self {
            Self {
                answer: Mutex::new(Some(answer)),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize_diff(&self, _old: &str, _new: &str) -> Result<DiffSummary> {
            *self.calls.lock().unwrap() += 1;
            self.answer
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Ok(DiffSummary::NoChange))
        }
    }

    fn post(title: &str, body: &str) -> Post {
        Post {
            source_key: "s".into(),
            external_id: "1".into(),
            title: title.into(),
            body: body.into(),
            url: "https://example.com/1".into(),
            ..Default::default()
        }
    }

    fn sized(name: &str, url: &str, size: Option<u64>) -> Attachment {
        Attachment {
            size_bytes: size,
            ..Attachment::new(name, url)
        }
    }

    #[tokio::test]
    async fn test_title_only_change() {
        let builder = ChangeSetBuilder::new(None, "내용 변경됨");
        let changes = builder
            .build(&post("새 제목", "본문"), &post("옛 제목", "본문"))
            .await;

        assert_eq!(changes.title.as_deref(), Some("'옛 제목' -> '새 제목'"));
        assert!(changes.content_summary.is_none());
        assert!(changes.raw_bodies().is_none());
        assert!(!changes.images_changed);
        assert!(!changes.attachments_changed);
    }

    #[tokio::test]
    async fn test_body_change_with_summary() {
        let summarizer = FixedSummarizer::new(Ok(DiffSummary::Changed(
            "마감일이 3월 10일로 연장됨".into(),
        )));
        let builder = ChangeSetBuilder::new(Some(&summarizer), "내용 변경됨");
        let changes = builder
            .build(&post("t", "마감: 3월 10일"), &post("t", "마감: 3월 5일"))
            .await;

        assert_eq!(
            changes.content_summary.as_deref(),
            Some("마감일이 3월 10일로 연장됨")
        );
        assert_eq!(
            changes.raw_bodies(),
            Some(("마감: 3월 5일", "마감: 3월 10일"))
        );
        assert_eq!(summarizer.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_change_sentinel_drops_everything() {
        let summarizer = FixedSummarizer::new(Ok(DiffSummary::NoChange));
        let builder = ChangeSetBuilder::new(Some(&summarizer), "내용 변경됨");
        let changes = builder
            .build(&post("t", "공지 내용입니다"), &post("t", "공지 내용 입니다"))
            .await;

        assert!(changes.content_summary.is_none());
        assert!(changes.raw_old_body.is_none());
        assert!(changes.raw_new_body.is_none());
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_summarizer_failure_uses_placeholder() {
        let summarizer = FixedSummarizer::new(Err(AppError::degraded("summarizer", "quota")));
        let builder = ChangeSetBuilder::new(Some(&summarizer), "내용 변경됨");
        let changes = builder.build(&post("t", "new"), &post("t", "old")).await;

        assert_eq!(changes.content_summary.as_deref(), Some("내용 변경됨"));
        assert_eq!(changes.raw_bodies(), Some(("old", "new")));
    }

    #[tokio::test]
    async fn test_whitespace_only_body_change_is_not_material() {
        let summarizer = FixedSummarizer::new(Ok(DiffSummary::Changed("x".into())));
        let builder = ChangeSetBuilder::new(Some(&summarizer), "내용 변경됨");
        let changes = builder
            .build(&post("t", "  본문\n"), &post("t", "본문"))
            .await;

        assert!(changes.is_empty());
        assert_eq!(summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn test_attachment_add_remove_and_replace() {
        let builder = ChangeSetBuilder::new(None, "내용 변경됨");
        let mut old = post("t", "b");
        old.attachments = vec![
            sized("keep.pdf", "u/keep", Some(10)),
            sized("gone.hwp", "u/gone", Some(20)),
            sized("form.docx", "u/form", Some(30)),
        ];
        let mut new = post("t", "b");
        new.attachments = vec![
            sized("keep.pdf", "u/keep", Some(10)),
            sized("form.docx", "u/form", Some(31)),
            sized("added.xlsx", "u/added", None),
        ];

        let changes = builder.build(&new, &old).await;
        assert!(changes.attachments_changed);
        assert_eq!(
            changes.attachments_added,
            BTreeSet::from(["added.xlsx".to_string(), "form.docx".to_string()])
        );
        assert_eq!(
            changes.attachments_removed,
            BTreeSet::from(["form.docx".to_string(), "gone.hwp".to_string()])
        );
    }

    #[tokio::test]
    async fn test_same_key_url_move_is_a_replacement() {
        let builder = ChangeSetBuilder::new(None, "내용 변경됨");
        let mut old = post("t", "b");
        old.attachments = vec![sized("a.pdf", "u/v1", Some(10))];
        let mut new = post("t", "b");
        new.attachments = vec![sized("a.pdf", "u/v2", Some(10))];

        let changes = builder.build(&new, &old).await;
        assert!(changes.attachments_changed);
        assert!(changes.attachments_added.contains("a.pdf"));
        assert!(changes.attachments_removed.contains("a.pdf"));
    }

    #[tokio::test]
    async fn test_image_set_change() {
        let builder = ChangeSetBuilder::new(None, "내용 변경됨");
        let mut old = post("t", "b");
        old.images = vec!["a.png".into()];
        let mut new = post("t", "b");
        new.images = vec!["b.png".into()];

        let changes = builder.build(&new, &old).await;
        assert!(changes.images_changed);
        assert!(!changes.attachments_touched());
    }
}
