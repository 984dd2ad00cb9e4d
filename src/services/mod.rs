//! Collaborators of the change pipeline.
//!
//! The pipeline talks to the outside world only through the traits below:
//! - Post persistence (`Repository`)
//! - Attachment freshness checks (`FreshnessProbe`)
//! - Natural-language diff summaries (`Summarizer`)
//! - Document preview rendering (`FileProcessor`)
//! - Post discovery (`PostSource`)
//! - Category/tag/summary extraction (`Analyzer`)
//!
//! Thin default adapters live in the submodules.

mod ai;
mod attachments;
mod feed;
mod files;
mod probe;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Analysis, DeliveryRecord, Platform, Post, RecordId, SourceConfig, StoredPost,
};

pub use ai::{BudgetedSummarizer, HttpAiService, SummaryBudget};
pub use attachments::AttachmentProcessor;
pub use feed::JsonFeedSource;
pub use files::NoPreviews;
pub use probe::HttpProbe;

/// Durable post state and delivery records.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Last committed version of a post, with its delivery records.
    async fn last_known_post(
        &self,
        source_key: &str,
        external_id: &str,
    ) -> Result<Option<StoredPost>>;

    /// `external_id -> fingerprint` for the most recently stored posts.
    async fn recent_fingerprints(
        &self,
        source_key: &str,
        limit: usize,
    ) -> Result<HashMap<String, String>>;

    /// Insert or replace a post, keeping existing delivery records.
    async fn upsert_post(&self, post: &Post) -> Result<RecordId>;

    /// Remember where a post was delivered.
    async fn set_delivery_record(&self, id: &RecordId, record: &DeliveryRecord) -> Result<()>;

    /// Replace the platforms still owed the committed version of a post.
    async fn set_pending(&self, id: &RecordId, platforms: &[Platform]) -> Result<()>;
}

/// Outcome of a HEAD request. Missing fields are meaningful, so this never errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// HTTP status, `None` when no response arrived
    pub status: Option<u16>,
    pub content_length: Option<u64>,
    pub etag: Option<String>,
}

impl ProbeResult {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(s) if (200..300).contains(&s))
    }
}

/// Cheap remote metadata check for an attachment.
#[async_trait]
pub trait FreshnessProbe: Send + Sync {
    async fn head_probe(&self, url: &str, referer: &str) -> ProbeResult;
}

/// Answer of the diff summarizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSummary {
    Changed(String),
    /// The texts say the same thing
    NoChange,
}

impl DiffSummary {
    const SENTINELS: [&'static str; 2] = ["NO_CHANGE", "변동사항 없음"];
    const SENTINEL_PHRASE: &'static str = "내용 변화는 없습니다";

    /// Interpret raw summarizer text, recognizing the no-change sentinels.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty()
            || Self::SENTINELS.contains(&trimmed)
            || trimmed.contains(Self::SENTINEL_PHRASE)
        {
            Self::NoChange
        } else {
            Self::Changed(trimmed.to_string())
        }
    }
}

/// Produces a one-sentence description of a body change.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize_diff(&self, old: &str, new: &str) -> Result<DiffSummary>;
}

/// Renders document pages to images.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn extract_previews(&self, bytes: &[u8], name: &str) -> Result<Vec<Vec<u8>>>;
}

/// Fetches candidate posts for a source.
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn fetch_posts(&self, source: &SourceConfig) -> Result<Vec<Post>>;
}

/// Assigns category, tags and a short summary to a post.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, post: &Post) -> Result<Analysis>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_summary_sentinels() {
        assert_eq!(DiffSummary::parse("NO_CHANGE"), DiffSummary::NoChange);
        assert_eq!(DiffSummary::parse("  변동사항 없음\n"), DiffSummary::NoChange);
        assert_eq!(
            DiffSummary::parse("결론적으로 내용 변화는 없습니다."),
            DiffSummary::NoChange
        );
        assert_eq!(DiffSummary::parse(""), DiffSummary::NoChange);
        assert_eq!(
            DiffSummary::parse("신청 마감일이 5월 3일로 연장됨"),
            DiffSummary::Changed("신청 마감일이 5월 3일로 연장됨".into())
        );
    }

    #[test]
    fn test_probe_result_success() {
        let ok = ProbeResult {
            status: Some(200),
            ..Default::default()
        };
        assert!(ok.is_success());
        assert!(!ProbeResult::failed().is_success());
    }
}
