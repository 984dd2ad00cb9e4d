//! Attachment enrichment before fingerprinting.
//!
//! Processable documents are downloaded to learn their size and render
//! previews; everything else gets its size and etag from a HEAD probe. Jobs
//! for one post run with bounded concurrency and finish in attachment order.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use super::{FileProcessor, FreshnessProbe};
use crate::models::{Attachment, AttachmentConfig, Post};
use crate::notify::MediaFetcher;

const PROCESSABLE: [&str; 9] = [
    "pdf", "hwp", "hwpx", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
];

pub struct AttachmentProcessor {
    media: MediaFetcher,
    files: Arc<dyn FileProcessor>,
    probe: Arc<dyn FreshnessProbe>,
    config: AttachmentConfig,
}

impl AttachmentProcessor {
    pub fn new(
        media: MediaFetcher,
        files: Arc<dyn FileProcessor>,
        probe: Arc<dyn FreshnessProbe>,
        config: AttachmentConfig,
    ) -> Self {
        Self {
            media,
            files,
            probe,
            config,
        }
    }

    /// Documents we download and render.
    pub fn is_processable(attachment: &Attachment) -> bool {
        attachment
            .extension()
            .is_some_and(|ext| PROCESSABLE.contains(&ext.as_str()))
    }

    /// Fill in size, etag and previews for the first `max_attachments` attachments.
    pub async fn process(&self, post: &mut Post) {
        if post.attachments.is_empty() {
            return;
        }

        let limit = self.config.max_attachments.min(post.attachments.len());
        let mut rendered = 0;
        let jobs: Vec<(Attachment, bool)> = post.attachments[..limit]
            .iter()
            .map(|attachment| {
                let render =
                    Self::is_processable(attachment) && rendered < self.config.max_previews;
                if render {
                    rendered += 1;
                }
                (attachment.clone(), render)
            })
            .collect();

        let referer = post.url.clone();
        let processed: Vec<Attachment> = stream::iter(jobs)
            .map(|(attachment, render)| self.process_one(attachment, &referer, render))
            .buffered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        for (slot, attachment) in post.attachments.iter_mut().zip(processed) {
            *slot = attachment;
        }
    }

    async fn process_one(&self, mut attachment: Attachment, referer: &str, render: bool) -> Attachment {
        if !Self::is_processable(&attachment) {
            let probe = self.probe.head_probe(&attachment.url, referer).await;
            if probe.is_success() {
                if probe.content_length.is_some() {
                    attachment.size_bytes = probe.content_length;
                }
                if probe.etag.is_some() {
                    attachment.etag = probe.etag;
                }
            }
            return attachment;
        }

        let response = match self.media.download(&attachment.url, referer).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Could not download {}: {}", attachment.name, e);
                return attachment;
            }
        };
        attachment.size_bytes = Some(response.body.len() as u64);
        if let Some(etag) = response.header("etag") {
            attachment.etag = Some(etag.trim().to_string());
        }

        if render {
            match self
                .files
                .extract_previews(&response.body, &attachment.name)
                .await
            {
                Ok(mut pages) => {
                    pages.retain(|page| !page.is_empty());
                    pages.truncate(self.config.max_preview_pages);
                    log::debug!("{} preview pages for {}", pages.len(), attachment.name);
                    attachment.previews = pages;
                }
                Err(e) => log::warn!("Preview rendering failed for {}: {}", attachment.name, e),
            }
        }
        attachment
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::{AppError, Result};
    use crate::models::TransportConfig;
    use crate::notify::testing::FakeTransport;
    use crate::notify::{ApiResponse, TransportPolicy};
    use crate::services::ProbeResult;

    struct Pages {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl FileProcessor for Pages {
        async fn extract_previews(&self, _bytes: &[u8], name: &str) -> Result<Vec<Vec<u8>>> {
            self.calls.lock().unwrap().push(name.to_string());
            if self.fail {
                return Err(AppError::validation("corrupt document"));
            }
            Ok(vec![vec![1], Vec::new(), vec![2], vec![3]])
        }
    }

    struct FixedProbe;

    #[async_trait]
    impl FreshnessProbe for FixedProbe {
        async fn head_probe(&self, _url: &str, _referer: &str) -> ProbeResult {
            ProbeResult {
                status: Some(200),
                content_length: Some(4096),
                etag: Some("\"zip-v1\"".into()),
            }
        }
    }

    fn processor(
        fake: &Arc<FakeTransport>,
        pages: Arc<Pages>,
        config: AttachmentConfig,
    ) -> AttachmentProcessor {
        let policy = TransportPolicy::new(
            fake.clone(),
            &TransportConfig {
                max_attempts: 1,
                ..Default::default()
            },
        );
        AttachmentProcessor::new(
            MediaFetcher::new(policy, Duration::from_secs(5)),
            pages,
            Arc::new(FixedProbe),
            config,
        )
    }

    fn pages(fail: bool) -> Arc<Pages> {
        Arc::new(Pages {
            calls: Mutex::new(Vec::new()),
            fail,
        })
    }

    fn post(attachments: Vec<Attachment>) -> Post {
        Post {
            url: "https://example.com/notice/1".into(),
            attachments,
            ..Default::default()
        }
    }

    #[test]
    fn test_is_processable() {
        assert!(AttachmentProcessor::is_processable(&Attachment::new("a.HWP", "u")));
        assert!(AttachmentProcessor::is_processable(&Attachment::new("b.pptx", "u")));
        assert!(!AttachmentProcessor::is_processable(&Attachment::new("c.zip", "u")));
        assert!(!AttachmentProcessor::is_processable(&Attachment::new("noext", "u")));
    }

    #[tokio::test]
    async fn test_documents_downloaded_others_probed() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond_with(
            "files/pdf",
            ApiResponse {
                status: 200,
                headers: vec![("etag".into(), "\"pdf-v2\"".into())],
                body: vec![0; 1500],
            },
        );
        let renderer = pages(false);
        let processor = processor(
            &fake,
            renderer.clone(),
            AttachmentConfig {
                max_preview_pages: 2,
                ..Default::default()
            },
        );
        let mut post = post(vec![
            Attachment::new("plan.pdf", "https://example.com/files/pdf"),
            Attachment::new("photos.zip", "https://example.com/files/zip"),
        ]);

        processor.process(&mut post).await;

        let pdf = &post.attachments[0];
        assert_eq!(pdf.size_bytes, Some(1500));
        assert_eq!(pdf.etag.as_deref(), Some("\"pdf-v2\""));
        assert_eq!(pdf.previews, vec![vec![1], vec![2]]);

        let zip = &post.attachments[1];
        assert_eq!(zip.size_bytes, Some(4096));
        assert_eq!(zip.etag.as_deref(), Some("\"zip-v1\""));
        assert!(zip.previews.is_empty());

        // only the document was fetched; the zip went through the probe
        assert_eq!(fake.requests().len(), 1);
        assert_eq!(*renderer.calls.lock().unwrap(), vec!["plan.pdf"]);
    }

    #[tokio::test]
    async fn test_preview_and_attachment_caps() {
        let fake = Arc::new(FakeTransport::new());
        let renderer = pages(false);
        let processor = processor(
            &fake,
            renderer.clone(),
            AttachmentConfig {
                max_previews: 1,
                max_attachments: 2,
                ..Default::default()
            },
        );
        let mut post = post(vec![
            Attachment::new("a.pdf", "https://example.com/a"),
            Attachment::new("b.hwp", "https://example.com/b"),
            Attachment::new("c.pdf", "https://example.com/c"),
        ]);

        processor.process(&mut post).await;

        assert_eq!(*renderer.calls.lock().unwrap(), vec!["a.pdf"]);
        assert!(!post.attachments[0].previews.is_empty());
        assert!(post.attachments[1].previews.is_empty());
        assert!(post.attachments[1].size_bytes.is_some());
        // beyond max_attachments nothing is touched
        assert_eq!(post.attachments[2], Attachment::new("c.pdf", "https://example.com/c"));
    }

    #[tokio::test]
    async fn test_failures_leave_attachment_untouched() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond("files/gone", 404, json!({}));
        let processor = processor(&fake, pages(true), AttachmentConfig::default());
        let mut post = post(vec![
            Attachment::new("gone.pdf", "https://example.com/files/gone"),
            Attachment::new("broken.hwp", "https://example.com/files/broken"),
        ]);

        processor.process(&mut post).await;

        assert_eq!(post.attachments[0], Attachment::new("gone.pdf", "https://example.com/files/gone"));
        assert!(post.attachments[1].size_bytes.is_some());
        assert!(post.attachments[1].previews.is_empty());
    }
}
