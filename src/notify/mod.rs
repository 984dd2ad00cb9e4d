//! Per-platform notification dispatch.
//!
//! Both platforms follow the same protocol:
//!
//! ```text
//! NoRecord --New--> HasRecord --Modified--> HasRecord
//!                       |
//!                       +--Modified, reply rejected as not found--> NoRecord --create--> HasRecord
//! ```
//!
//! After the primary message succeeds, secondary content goes out in a fixed
//! order: previews, then attachment files, then the detailed diff. A failing
//! secondary step is logged and skipped; it never undoes the primary record.

pub mod channel;
pub mod format;
pub mod forum;
pub mod media;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{ChangeSet, Classification, Config, DeliveryRecord, Platform, Post};
use crate::pipeline::diff::clean_diff;

pub use channel::ChannelDispatcher;
pub use forum::ForumDispatcher;
pub use media::{Downloaded, MediaFetcher};
pub use transport::{
    ApiRequest, ApiResponse, ApiTransport, FormPart, PartValue, RequestBody, ReqwestTransport,
    TransportPolicy,
};

/// Everything a dispatcher needs to notify about one post.
#[derive(Debug, Clone, Copy)]
pub struct Dispatch<'a> {
    pub post: &'a Post,
    pub classification: Classification,
    /// Present for `Modified`
    pub changes: Option<&'a ChangeSet>,
    /// Record from an earlier delivery on this platform
    pub prior: Option<&'a DeliveryRecord>,
}

impl Dispatch<'_> {
    /// Full-resolution images go out for new posts or when the image set changed.
    pub fn send_images(&self) -> bool {
        self.classification.is_new() || self.changes.is_some_and(|c| c.images_changed)
    }

    /// Previews go out for new posts or when attachments were added, removed or replaced.
    pub fn send_previews(&self) -> bool {
        self.classification.is_new() || self.changes.is_some_and(ChangeSet::attachments_touched)
    }

    /// Change summary to show, if any.
    pub fn reported_changes(&self) -> Option<&ChangeSet> {
        if self.classification.is_new() {
            return None;
        }
        self.changes.filter(|c| !c.is_empty())
    }
}

/// A chat platform the relay delivers to.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether posts from this source are routed to the platform.
    fn handles(&self, source_key: &str) -> bool;

    /// Deliver a new or modified post, returning the record to persist.
    async fn dispatch(&self, dispatch: &Dispatch<'_>) -> Result<DeliveryRecord>;
}

/// Where secondary content for a delivery goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// Identifier persisted as the delivery record
    pub record: String,
    /// Channel/thread/chat that follow-ups are posted to
    pub channel: String,
    /// Message follow-ups reply to
    pub reply_to: Option<String>,
}

/// Platform-specific steps driven by [`run_protocol`].
#[async_trait]
pub(crate) trait PlatformProtocol: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether a rejected reply means the remembered target is gone.
    fn is_stale(&self, error: &AppError) -> bool;

    fn detailed_diff(&self) -> bool;

    async fn fetch_images(&self, post: &Post) -> Vec<Downloaded>;

    /// Start a new conversation for the post.
    async fn create(&self, dispatch: &Dispatch<'_>, images: &[Downloaded]) -> Result<Anchor>;

    /// Post an update into a remembered conversation.
    async fn reply(
        &self,
        dispatch: &Dispatch<'_>,
        record: &DeliveryRecord,
        images: &[Downloaded],
    ) -> Result<Anchor>;

    async fn send_previews(&self, dispatch: &Dispatch<'_>, anchor: &Anchor) -> Result<()>;

    async fn send_files(&self, dispatch: &Dispatch<'_>, anchor: &Anchor) -> Result<()>;

    async fn send_diff(&self, dispatch: &Dispatch<'_>, anchor: &Anchor, diff: &str)
    -> Result<()>;
}

/// Drive the create/update/self-heal protocol for one platform.
pub(crate) async fn run_protocol<P>(protocol: &P, dispatch: &Dispatch<'_>) -> Result<DeliveryRecord>
where
    P: PlatformProtocol + ?Sized,
{
    let post = dispatch.post;
    let platform = protocol.platform();
    if dispatch.classification == Classification::Unchanged {
        return Err(AppError::validation(format!(
            "{}:{} is unchanged and must not be dispatched",
            post.source_key, post.external_id
        )));
    }

    let images = if dispatch.send_images() && !post.images.is_empty() {
        protocol.fetch_images(post).await
    } else {
        Vec::new()
    };

    let (anchor, created) = match (dispatch.classification, dispatch.prior) {
        (Classification::Modified, Some(record)) => {
            match protocol.reply(dispatch, record, &images).await {
                Ok(anchor) => (anchor, false),
                Err(e) if protocol.is_stale(&e) => {
                    let stale = AppError::StaleReference {
                        platform: platform.to_string(),
                        target: record.message_id.clone(),
                    };
                    log::warn!(
                        "{} for {}:{} ({}); starting a new one",
                        stale,
                        post.source_key,
                        post.external_id,
                        e
                    );
                    (protocol.create(dispatch, &images).await?, true)
                }
                Err(e) => return Err(e),
            }
        }
        _ => (protocol.create(dispatch, &images).await?, true),
    };
    log::info!(
        "[{}] {} {}:{} -> {}",
        platform,
        dispatch.classification.as_str(),
        post.source_key,
        post.external_id,
        anchor.record
    );

    // a fresh conversation carries the full preview set
    if (created || dispatch.send_previews())
        && post.attachments.iter().any(|a| !a.previews.is_empty())
        && let Err(e) = protocol.send_previews(dispatch, &anchor).await
    {
        log::warn!("[{}] previews skipped for {}: {}", platform, post.url, e);
    }

    if !post.attachments.is_empty()
        && let Err(e) = protocol.send_files(dispatch, &anchor).await
    {
        log::warn!("[{}] attachments skipped for {}: {}", platform, post.url, e);
    }

    if protocol.detailed_diff()
        && let Some((old, new)) = dispatch.changes.and_then(ChangeSet::raw_bodies)
    {
        let diff = clean_diff(old, new);
        if !diff.is_empty()
            && let Err(e) = protocol.send_diff(dispatch, &anchor, &diff).await
        {
            log::warn!("[{}] diff skipped for {}: {}", platform, post.url, e);
        }
    }

    Ok(DeliveryRecord::new(platform, anchor.record))
}

/// Source key to display name.
pub(crate) fn source_names(config: &Config) -> HashMap<String, String> {
    config
        .sources
        .iter()
        .filter(|s| !s.display_name.is_empty())
        .map(|s| (s.key.clone(), s.display_name.clone()))
        .collect()
}

/// Build a dispatcher for every configured platform.
pub fn build_channels(
    config: &Config,
    policy: &TransportPolicy,
    media: &MediaFetcher,
) -> Vec<Box<dyn NotificationChannel>> {
    let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();
    if let Some(discord) = &config.discord {
        channels.push(Box::new(ForumDispatcher::new(
            discord.clone(),
            config.labels.clone(),
            source_names(config),
            policy.clone(),
            media.clone(),
        )));
    }
    if let Some(telegram) = &config.telegram {
        channels.push(Box::new(ChannelDispatcher::new(
            telegram.clone(),
            config.labels.clone(),
            source_names(config),
            policy.clone(),
            media.clone(),
        )));
    }
    channels
}
