//! Local filesystem repository.
//!
//! Writes go through a temp file and a rename so a crash never leaves a
//! half-written source file. Read-modify-write cycles are serialized by a
//! process-wide lock; last writer wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::SourceFile;
use crate::error::{AppError, Result};
use crate::models::{DeliveryRecord, Platform, Post, RecordId, StoredPost};
use crate::services::Repository;

/// Local filesystem storage backend.
pub struct LocalStorage {
    root_dir: PathBuf,
    lock: Mutex<()>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// File key for a source. Characters unsafe in file names become `_`.
    fn source_key(source_key: &str) -> String {
        let name: String = source_key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("posts/{name}.json")
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load(&self, source_key: &str) -> Result<SourceFile> {
        Ok(self
            .read_json(&Self::source_key(source_key))
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, source_key: &str, mut file: SourceFile) -> Result<()> {
        file.updated_at = Utc::now();
        self.write_json(&Self::source_key(source_key), &file).await
    }

    /// Read-modify-write of one stored post.
    async fn update_stored(
        &self,
        id: &RecordId,
        apply: impl FnOnce(&mut StoredPost) + Send,
    ) -> Result<()> {
        let (source_key, external_id) = id
            .parts()
            .ok_or_else(|| AppError::validation(format!("malformed record id '{id}'")))?;

        let _guard = self.lock.lock().await;
        let mut file = self.load(source_key).await?;
        let stored = file
            .posts
            .get_mut(external_id)
            .ok_or_else(|| AppError::validation(format!("no stored post for '{id}'")))?;
        apply(stored);

        self.save(source_key, file).await
    }
}

#[async_trait]
impl Repository for LocalStorage {
    async fn last_known_post(
        &self,
        source_key: &str,
        external_id: &str,
    ) -> Result<Option<StoredPost>> {
        Ok(self.load(source_key).await?.posts.remove(external_id))
    }

    async fn recent_fingerprints(
        &self,
        source_key: &str,
        limit: usize,
    ) -> Result<HashMap<String, String>> {
        let file = self.load(source_key).await?;
        let mut stored: Vec<&StoredPost> = file.posts.values().collect();
        stored.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(stored
            .into_iter()
            .take(limit)
            .filter_map(|s| {
                s.post
                    .content_fingerprint
                    .clone()
                    .map(|fp| (s.post.external_id.clone(), fp))
            })
            .collect())
    }

    async fn upsert_post(&self, post: &Post) -> Result<RecordId> {
        let _guard = self.lock.lock().await;
        let mut file = self.load(&post.source_key).await?;
        let id = RecordId::for_post(&post.source_key, &post.external_id);

        let (deliveries, pending) = file
            .posts
            .remove(&post.external_id)
            .map(|previous| (previous.deliveries, previous.pending))
            .unwrap_or_default();
        file.posts.insert(
            post.external_id.clone(),
            StoredPost {
                id: id.clone(),
                post: post.clone(),
                deliveries,
                pending,
                updated_at: Utc::now(),
            },
        );

        self.save(&post.source_key, file).await?;
        log::debug!("Stored {}", id);
        Ok(id)
    }

    async fn set_delivery_record(&self, id: &RecordId, record: &DeliveryRecord) -> Result<()> {
        self.update_stored(id, |stored| stored.set_record(record.clone())).await
    }

    async fn set_pending(&self, id: &RecordId, platforms: &[Platform]) -> Result<()> {
        self.update_stored(id, |stored| {
            let mut pending = platforms.to_vec();
            pending.sort();
            pending.dedup();
            stored.pending = pending;
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    use super::*;
    use crate::models::Attachment;

    fn post(id: &str, fingerprint: &str) -> Post {
        Post {
            source_key: "cse_notice".into(),
            external_id: id.into(),
            title: format!("공지 {id}"),
            url: format!("https://example.com/{id}"),
            content_fingerprint: Some(fingerprint.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
        assert!(!storage.path("test.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(storage.read_bytes("nope.txt").await.unwrap().is_none());
        assert!(
            storage
                .last_known_post("cse_notice", "1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_source_file_names_are_sanitized() {
        assert_eq!(LocalStorage::source_key("cse_notice"), "posts/cse_notice.json");
        assert_eq!(LocalStorage::source_key("../etc"), "posts/___etc.json");
    }

    #[tokio::test]
    async fn test_upsert_keeps_delivery_records() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let id = storage.upsert_post(&post("1", "aaa")).await.unwrap();
        assert_eq!(id, RecordId::for_post("cse_notice", "1"));
        storage
            .set_delivery_record(&id, &DeliveryRecord::new(Platform::Discord, "555"))
            .await
            .unwrap();

        let mut revised = post("1", "bbb");
        revised.title = "수정된 공지".into();
        let mut attachment = Attachment::new("a.pdf", "https://example.com/a");
        attachment.previews = vec![vec![1, 2, 3]];
        revised.attachments = vec![attachment];
        storage.upsert_post(&revised).await.unwrap();

        let stored = storage
            .last_known_post("cse_notice", "1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.post.title, "수정된 공지");
        assert_eq!(stored.post.content_fingerprint.as_deref(), Some("bbb"));
        assert_eq!(
            stored.record_for(Platform::Discord).map(|r| r.message_id.as_str()),
            Some("555")
        );
        // previews are never persisted
        assert!(stored.post.attachments[0].previews.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_record_replaced_per_platform() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let id = storage.upsert_post(&post("1", "aaa")).await.unwrap();

        for record in [
            DeliveryRecord::new(Platform::Discord, "1"),
            DeliveryRecord::new(Platform::Telegram, "2"),
            DeliveryRecord::new(Platform::Discord, "3"),
        ] {
            storage.set_delivery_record(&id, &record).await.unwrap();
        }

        let stored = storage
            .last_known_post("cse_notice", "1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.deliveries.len(), 2);
        assert_eq!(stored.record_for(Platform::Discord).unwrap().message_id, "3");
    }

    #[tokio::test]
    async fn test_pending_survives_upsert_until_delivered() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let id = storage.upsert_post(&post("1", "aaa")).await.unwrap();

        storage
            .set_pending(&id, &[Platform::Discord, Platform::Discord])
            .await
            .unwrap();
        storage.upsert_post(&post("1", "aaa")).await.unwrap();
        let stored = storage
            .last_known_post("cse_notice", "1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.pending, vec![Platform::Discord]);

        storage
            .set_delivery_record(&id, &DeliveryRecord::new(Platform::Discord, "9"))
            .await
            .unwrap();
        let stored = storage
            .last_known_post("cse_notice", "1")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.pending.is_empty());
    }

    #[tokio::test]
    async fn test_set_record_for_unknown_post_fails() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let record = DeliveryRecord::new(Platform::Telegram, "1");

        assert!(
            storage
                .set_delivery_record(&RecordId::for_post("cse_notice", "404"), &record)
                .await
                .is_err()
        );
        assert!(
            storage
                .set_delivery_record(&RecordId("no-separator".into()), &record)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_recent_fingerprints_newest_first() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let base = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let mut file = SourceFile::default();
        for (idx, id) in ["old", "mid", "new"].iter().enumerate() {
            file.posts.insert(
                id.to_string(),
                StoredPost {
                    id: RecordId::for_post("cse_notice", id),
                    post: post(id, &format!("fp-{id}")),
                    deliveries: Vec::new(),
                    pending: Vec::new(),
                    updated_at: base + Duration::hours(idx as i64),
                },
            );
        }
        let mut unfingerprinted = post("bare", "");
        unfingerprinted.content_fingerprint = None;
        file.posts.insert(
            "bare".into(),
            StoredPost {
                id: RecordId::for_post("cse_notice", "bare"),
                post: unfingerprinted,
                deliveries: Vec::new(),
                pending: Vec::new(),
                updated_at: base - Duration::hours(1),
            },
        );
        storage
            .write_json(&LocalStorage::source_key("cse_notice"), &file)
            .await
            .unwrap();

        let recent = storage.recent_fingerprints("cse_notice", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent.get("new").map(String::as_str), Some("fp-new"));
        assert_eq!(recent.get("mid").map(String::as_str), Some("fp-mid"));

        let all = storage.recent_fingerprints("cse_notice", 100).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
