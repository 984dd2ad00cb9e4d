//! JSON post feeds.
//!
//! A feed is a JSON array of posts, served over HTTP or read from disk. The
//! scraping side that produces it is outside this crate.

use std::time::Duration;

use async_trait::async_trait;

use super::PostSource;
use crate::error::Result;
use crate::models::{Post, SourceConfig};
use crate::notify::{ApiRequest, TransportPolicy};
use crate::utils::url::{is_remote, resolve};

pub struct JsonFeedSource {
    policy: TransportPolicy,
    timeout: Duration,
}

impl JsonFeedSource {
    pub fn new(policy: TransportPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }

    async fn read_feed(&self, feed: &str) -> Result<Vec<u8>> {
        if is_remote(feed) {
            let request = ApiRequest::get(feed)
                .header("Accept", "application/json")
                .timeout(self.timeout);
            Ok(self.policy.execute("feed", &request).await?.body)
        } else {
            Ok(tokio::fs::read(feed).await?)
        }
    }
}

#[async_trait]
impl PostSource for JsonFeedSource {
    async fn fetch_posts(&self, source: &SourceConfig) -> Result<Vec<Post>> {
        let bytes = self.read_feed(&source.feed).await?;
        let posts: Vec<Post> = serde_json::from_slice(&bytes)?;
        let total = posts.len();

        let posts: Vec<Post> = posts
            .into_iter()
            .filter(|p| !p.external_id.trim().is_empty())
            .map(|mut p| {
                p.source_key = source.key.clone();
                absolutize(&mut p);
                p
            })
            .collect();
        if posts.len() < total {
            log::warn!(
                "[{}] dropped {} feed entries without an id",
                source.key,
                total - posts.len()
            );
        }
        log::debug!("[{}] {} posts from {}", source.key, posts.len(), source.feed);
        Ok(posts)
    }
}

/// Scrapers often emit links relative to the post page.
fn absolutize(post: &mut Post) {
    for image in &mut post.images {
        *image = resolve(&post.url, image);
    }
    for attachment in &mut post.attachments {
        attachment.url = resolve(&post.url, &attachment.url);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::models::TransportConfig;
    use crate::notify::testing::FakeTransport;

    fn source(feed: &str) -> SourceConfig {
        SourceConfig {
            key: "cse_notice".into(),
            display_name: "컴공공지".into(),
            feed: feed.into(),
        }
    }

    fn feed_source(fake: &Arc<FakeTransport>) -> JsonFeedSource {
        let policy = TransportPolicy::new(fake.clone(), &TransportConfig::default());
        JsonFeedSource::new(policy, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_http_feed_sets_source_key() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond(
            "feed.json",
            200,
            json!([
                { "external_id": "1", "title": "첫 공지", "url": "https://e.com/1" },
                { "external_id": "", "title": "id 없음", "url": "https://e.com/x" },
                {
                    "source_key": "other",
                    "external_id": "2",
                    "title": "둘째",
                    "url": "https://e.com/board/2",
                    "images": ["/img/1.png"],
                    "attachments": [{ "name": "a.pdf", "url": "files/a.pdf" }]
                }
            ]),
        );

        let posts = feed_source(&fake)
            .fetch_posts(&source("https://e.com/feed.json"))
            .await
            .unwrap();

        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|p| p.source_key == "cse_notice"));
        assert_eq!(posts[1].attachments[0].name, "a.pdf");
        assert_eq!(posts[1].attachments[0].url, "https://e.com/board/files/a.pdf");
        assert_eq!(posts[1].images, vec!["https://e.com/img/1.png"]);
    }

    #[tokio::test]
    async fn test_file_feed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(
            &path,
            json!([{ "external_id": "9", "title": "t", "url": "u", "body": "본문" }]).to_string(),
        )
        .unwrap();

        let fake = Arc::new(FakeTransport::new());
        let posts = feed_source(&fake)
            .fetch_posts(&source(path.to_str().unwrap()))
            .await
            .unwrap();

        assert_eq!(posts[0].body, "본문");
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let fake = Arc::new(FakeTransport::new());
        let result = feed_source(&fake)
            .fetch_posts(&source("/definitely/not/here.json"))
            .await;
        assert!(result.is_err());
    }
}
