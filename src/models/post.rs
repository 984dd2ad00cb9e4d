//! Post and attachment data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post observed on a content source.
///
/// `(source_key, external_id)` is the identity across time. The same identity
/// with a different fingerprint is a revision, not a new post.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Post {
    /// Source the post was fetched from
    #[serde(default)]
    pub source_key: String,

    /// Identifier unique within the source
    pub external_id: String,

    pub title: String,

    /// Plain-text body
    #[serde(default)]
    pub body: String,

    /// Canonical link to the post
    pub url: String,

    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,

    /// Content image URLs in page order
    #[serde(default)]
    pub images: Vec<String>,

    /// Attachments in page order
    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub author: Option<String>,

    /// Category assigned by the analyzer
    #[serde(default)]
    pub category: Option<String>,

    /// Tags assigned by the analyzer
    #[serde(default)]
    pub tags: Vec<String>,

    /// Short summary assigned by the analyzer
    #[serde(default)]
    pub summary: Option<String>,

    /// Fingerprint recorded when the post was last stored
    #[serde(default)]
    pub content_fingerprint: Option<String>,
}

impl Post {
    /// Whether the post carries any images or attachments.
    pub fn has_media(&self) -> bool {
        !self.images.is_empty() || !self.attachments.is_empty()
    }

    /// Copy analyzer output onto the post.
    pub fn apply_analysis(&mut self, analysis: Analysis) {
        self.category = analysis.category;
        self.tags = analysis.tags;
        self.summary = analysis.summary;
    }

    /// Reuse analyzer output from a previous version of this post.
    pub fn inherit_analysis(&mut self, previous: &Post) {
        self.category = previous.category.clone();
        self.tags = previous.tags.clone();
        self.summary = previous.summary.clone();
    }

    /// Category, falling back to the general bucket.
    pub fn category_or_default(&self) -> &str {
        self.category.as_deref().unwrap_or("일반")
    }
}

/// A file attached to a post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,

    /// Size recorded from a download or a HEAD probe
    #[serde(default)]
    pub size_bytes: Option<u64>,

    #[serde(default)]
    pub etag: Option<String>,

    /// Rendered page previews. Never persisted.
    #[serde(skip)]
    pub previews: Vec<Vec<u8>>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Lowercased file extension, if the name has one.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }

    /// Change-detection key: name plus the known size (`0` when unknown).
    pub fn change_key(&self) -> String {
        format!("{}_{}", self.name, self.size_bytes.unwrap_or(0))
    }
}

// Previews are transient and don't take part in equality.
impl PartialEq for Attachment {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.url == other.url
            && self.size_bytes == other.size_bytes
            && self.etag == other.etag
    }
}

/// Output of the analysis collaborator. Opaque to the change pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Analysis {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}
