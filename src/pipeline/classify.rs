//! New / modified / unchanged verdicts.
//!
//! Cheap field comparisons run first; attachments that carry recorded
//! metadata are then verified with HEAD probes. Anything that cannot be
//! verified counts as modified.

use std::collections::BTreeSet;

use crate::models::{Attachment, Classification, Post};
use crate::services::FreshnessProbe;

/// Compares a fetched post against its last stored version.
pub struct ChangeClassifier<'a> {
    probe: &'a dyn FreshnessProbe,
}

impl<'a> ChangeClassifier<'a> {
    pub fn new(probe: &'a dyn FreshnessProbe) -> Self {
        Self { probe }
    }

    /// Classify `fetched` against `stored`.
    pub async fn classify(&self, fetched: &Post, stored: Option<&Post>) -> Classification {
        let Some(stored) = stored else {
            return Classification::New;
        };

        let reason = match Self::cheap_mismatch(fetched, stored) {
            Some(reason) => Some(reason.to_string()),
            None => self.attachment_mismatch(fetched, stored).await,
        };

        match reason {
            Some(reason) => {
                log::debug!(
                    "{}:{} modified ({})",
                    fetched.source_key,
                    fetched.external_id,
                    reason
                );
                Classification::Modified
            }
            None => Classification::Unchanged,
        }
    }

    fn cheap_mismatch(fetched: &Post, stored: &Post) -> Option<&'static str> {
        if fetched.title != stored.title {
            return Some("title");
        }
        if fetched.body != stored.body {
            return Some("body");
        }
        if fetched.attachments.len() != stored.attachments.len() {
            return Some("attachment count");
        }
        let fetched_images: BTreeSet<&str> = fetched.images.iter().map(String::as_str).collect();
        let stored_images: BTreeSet<&str> = stored.images.iter().map(String::as_str).collect();
        if fetched_images != stored_images {
            return Some("images");
        }
        None
    }

    /// Positional pass over attachments.
    async fn attachment_mismatch(&self, fetched: &Post, stored: &Post) -> Option<String> {
        for (idx, current) in fetched.attachments.iter().enumerate() {
            let Some(previous) = stored.attachments.get(idx) else {
                return Some(format!("attachment #{idx} is new"));
            };
            if current.name != previous.name {
                return Some(format!("attachment #{idx} renamed"));
            }
            if current.url != previous.url {
                return Some(format!("attachment '{}' moved", current.name));
            }
            if let Some(reason) = self.verify(current, previous, &fetched.url).await {
                return Some(format!("attachment '{}': {reason}", current.name));
            }
        }
        None
    }

    /// Probe one attachment against its recorded metadata.
    async fn verify(
        &self,
        current: &Attachment,
        previous: &Attachment,
        referer: &str,
    ) -> Option<&'static str> {
        if previous.size_bytes.is_none() && previous.etag.is_none() {
            return Some("no recorded size or etag");
        }

        let probe = self.probe.head_probe(&current.url, referer).await;
        if !probe.is_success() {
            return Some("probe failed");
        }
        if probe.content_length.is_none() && probe.etag.is_none() {
            return Some("probe returned no metadata");
        }
        if let (Some(size), Some(length)) = (previous.size_bytes, probe.content_length)
            && size != length
        {
            return Some("size differs");
        }
        if let (Some(etag), Some(remote)) = (&previous.etag, &probe.etag)
            && etag != remote
        {
            return Some("etag differs");
        }
        None
    }
}
