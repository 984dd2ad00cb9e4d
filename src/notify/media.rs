//! Image and attachment downloads.
//!
//! Downloads send the post URL as `Referer` (many boards reject hotlinks),
//! use the server's `Content-Disposition` filename when present, and drop
//! files above the caller's size limit.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::transport::{ApiRequest, ApiResponse, TransportPolicy};
use crate::error::Result;
use crate::models::{Attachment, Post};

/// A downloaded file ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Downloaded {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Fetches images and attachments through the shared transport policy.
#[derive(Clone)]
pub struct MediaFetcher {
    policy: TransportPolicy,
    timeout: Duration,
}

impl MediaFetcher {
    pub fn new(policy: TransportPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }

    /// GET `url` with the post as referer.
    pub async fn download(&self, url: &str, referer: &str) -> Result<ApiResponse> {
        let request = ApiRequest::get(url)
            .header("Referer", referer)
            .header("Accept", "*/*")
            .timeout(self.timeout);
        self.policy.execute("download", &request).await
    }

    /// Download an attachment for upload. Failures and oversize files yield `None`.
    pub async fn fetch_file(
        &self,
        attachment: &Attachment,
        referer: &str,
        max_bytes: u64,
    ) -> Option<Downloaded> {
        let response = match self.download(&attachment.url, referer).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Failed to download {}: {}", attachment.name, e);
                return None;
            }
        };

        if response.body.len() as u64 > max_bytes {
            log::warn!(
                "Skipping {} ({} bytes exceeds {} byte limit)",
                attachment.name,
                response.body.len(),
                max_bytes
            );
            return None;
        }

        let filename = response
            .header("content-disposition")
            .and_then(disposition_filename)
            .unwrap_or_else(|| attachment.name.clone());
        log::debug!("Downloaded '{}' ({} bytes)", filename, response.body.len());

        Some(Downloaded {
            filename,
            bytes: response.body,
        })
    }

    /// Download the first `limit` attachments of a post, in order.
    pub async fn fetch_files(&self, post: &Post, limit: usize, max_bytes: u64) -> Vec<Downloaded> {
        let mut files = Vec::new();
        for attachment in post.attachments.iter().take(limit) {
            if let Some(file) = self.fetch_file(attachment, &post.url, max_bytes).await {
                files.push(file);
            }
        }
        files
    }

    /// Download content images of a post, named `image_{idx}.{ext}`.
    pub async fn fetch_images(&self, post: &Post, limit: usize, max_bytes: u64) -> Vec<Downloaded> {
        let mut images = Vec::new();
        for (idx, url) in post.images.iter().take(limit).enumerate() {
            match self.download(url, &post.url).await {
                Ok(response) if response.body.len() as u64 <= max_bytes => {
                    images.push(Downloaded {
                        filename: format!("image_{}.{}", idx, image_extension(url)),
                        bytes: response.body,
                    });
                }
                Ok(response) => log::warn!(
                    "Skipping image {} ({} bytes too large)",
                    idx,
                    response.body.len()
                ),
                Err(e) => log::warn!("Failed to download image {}: {}", idx, e),
            }
        }
        images
    }
}

static RE_FILENAME_EXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\*\s*=\s*(?:[\w-]+'[^']*')?"?([^";]+)"?"#)
        .expect("valid filename* pattern")
});
static RE_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*["']?([^"';]+)["']?"#).expect("valid filename pattern")
});

/// Filename from a `Content-Disposition` header, percent-decoded.
pub fn disposition_filename(header: &str) -> Option<String> {
    // RFC 5987 `filename*` wins over the plain form
    let raw = [&*RE_FILENAME_EXT, &*RE_FILENAME]
        .iter()
        .find_map(|re| re.captures(header))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())?;

    let decoded = urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    (!decoded.is_empty()).then_some(decoded)
}

fn image_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        "png"
    } else if path.ends_with(".gif") {
        "gif"
    } else if path.ends_with(".webp") {
        "webp"
    } else {
        "jpg"
    }
}
