//! Platform delivery bookkeeping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Post;

/// Chat platform a post is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Discord,
    Telegram,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Telegram => "telegram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform-side identifier of a delivered post.
///
/// Discord stores the forum thread id, or `channel/message` when thread
/// creation was refused and a plain channel message went out instead.
/// Telegram stores the root message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub platform: Platform,
    pub message_id: String,
}

impl DeliveryRecord {
    pub fn new(platform: Platform, message_id: impl Into<String>) -> Self {
        Self {
            platform,
            message_id: message_id.into(),
        }
    }
}

/// Repository key of a stored post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn for_post(source_key: &str, external_id: &str) -> Self {
        Self(format!("{source_key}:{external_id}"))
    }

    /// Split back into `(source_key, external_id)`.
    pub fn parts(&self) -> Option<(&str, &str)> {
        self.0.split_once(':')
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A post as last committed, with its delivery records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPost {
    pub id: RecordId,
    pub post: Post,
    #[serde(default)]
    pub deliveries: Vec<DeliveryRecord>,
    /// Platforms that rejected the committed version; retried on the next run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<Platform>,
    pub updated_at: DateTime<Utc>,
}

impl StoredPost {
    /// Delivery record for a platform, if the post was ever delivered there.
    pub fn record_for(&self, platform: Platform) -> Option<&DeliveryRecord> {
        self.deliveries.iter().find(|r| r.platform == platform)
    }

    /// Insert or replace the record for its platform. The platform is no longer pending.
    pub fn set_record(&mut self, record: DeliveryRecord) {
        self.pending.retain(|p| *p != record.platform);
        match self
            .deliveries
            .iter_mut()
            .find(|r| r.platform == record.platform)
        {
            Some(existing) => *existing = record,
            None => self.deliveries.push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_round_trip() {
        let id = RecordId::for_post("cse_notice", "1234");
        assert_eq!(id.to_string(), "cse_notice:1234");
        assert_eq!(id.parts(), Some(("cse_notice", "1234")));
    }

    #[test]
    fn test_set_record_replaces_same_platform() {
        let mut stored = StoredPost {
            id: RecordId::for_post("s", "1"),
            post: Post::default(),
            deliveries: vec![DeliveryRecord::new(Platform::Discord, "old")],
            pending: vec![Platform::Telegram],
            updated_at: Utc::now(),
        };
        stored.set_record(DeliveryRecord::new(Platform::Discord, "new"));
        stored.set_record(DeliveryRecord::new(Platform::Telegram, "42"));

        assert_eq!(stored.deliveries.len(), 2);
        assert_eq!(
            stored.record_for(Platform::Discord).map(|r| r.message_id.as_str()),
            Some("new")
        );
        assert!(stored.pending.is_empty());
    }

    #[test]
    fn test_platform_serializes_lowercase() {
        let json = serde_json::to_string(&Platform::Telegram).unwrap();
        assert_eq!(json, "\"telegram\"");
    }
}
