//! Discord forum channels (API v10).
//!
//! A new post becomes a forum thread whose starter message carries the post
//! embed. Updates are replies inside that thread. The delivery record is the
//! thread id, which doubles as the channel id for follow-up messages.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use super::format::{
    UPDATE_COLOR, bullet_lines, category_color, category_emoji, change_summary, file_emoji,
};
use super::media::{Downloaded, MediaFetcher};
use super::transport::{ApiRequest, FormPart, TransportPolicy};
use super::{Anchor, Dispatch, NotificationChannel, PlatformProtocol, run_protocol};
use crate::error::{AppError, Result};
use crate::models::{DeliveryRecord, DiscordConfig, Labels, Platform, Post};
use crate::pipeline::diff::{chunk_text, truncate};

const THREAD_NAME_MAX: usize = 100;
const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 4000;
const FIELD_VALUE_MAX: usize = 1024;
/// Diff chunk size, leaving room for the code fence inside a field
const DIFF_CHUNK: usize = 950;
/// Split embeds before the 6000 character total limit
const EMBED_SPLIT_AT: usize = 5800;
const MAX_FIELDS: usize = 25;
const FILES_PER_MESSAGE: usize = 10;
const FILE_SIZE_LIMIT: u64 = 25 * 1024 * 1024;
const MAX_TAGS: usize = 5;
/// Three days, in minutes
const AUTO_ARCHIVE_MINUTES: u32 = 4320;

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Delivers posts to Discord forum channels.
pub struct ForumDispatcher {
    config: DiscordConfig,
    labels: Labels,
    source_names: HashMap<String, String>,
    policy: TransportPolicy,
    media: MediaFetcher,
}

impl ForumDispatcher {
    pub fn new(
        config: DiscordConfig,
        labels: Labels,
        source_names: HashMap<String, String>,
        policy: TransportPolicy,
        media: MediaFetcher,
    ) -> Self {
        Self {
            config,
            labels,
            source_names,
            policy,
            media,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn source_name<'a>(&'a self, source_key: &'a str) -> &'a str {
        self.source_names
            .get(source_key)
            .map(String::as_str)
            .unwrap_or(source_key)
    }

    /// JSON request, or multipart with `payload_json` when files ride along.
    fn message_request(&self, path: &str, payload: Value, files: &[Downloaded]) -> ApiRequest {
        let url = self.url(path);
        let request = if files.is_empty() {
            ApiRequest::post_json(url, payload)
        } else {
            let mut parts = vec![FormPart::text("payload_json", payload.to_string())];
            parts.extend(files.iter().enumerate().map(|(idx, file)| {
                FormPart::file(
                    format!("files[{idx}]"),
                    file.filename.clone(),
                    file.bytes.clone(),
                )
            }));
            ApiRequest::post_multipart(url, parts)
        };
        request
            .header("Authorization", format!("Bot {}", self.config.bot_token))
            .header(
                "User-Agent",
                concat!("DiscordBot (notice-relay, ", env!("CARGO_PKG_VERSION"), ")"),
            )
    }

    async fn post_message(
        &self,
        context: &str,
        channel: &str,
        mut payload: Value,
        files: &[Downloaded],
        reply_to: Option<&str>,
    ) -> Result<String> {
        if let Some(message_id) = reply_to {
            payload["message_reference"] = json!({ "message_id": message_id });
        }
        let request = self.message_request(&format!("channels/{channel}/messages"), payload, files);
        let response = self.policy.execute(context, &request).await?;
        Ok(response.json::<Created>()?.id)
    }

    /// Forum tag ids for the post's tags: exact name first, then case-insensitive.
    pub fn match_tags(&self, post: &Post) -> Vec<String> {
        let Some(available) = self.config.tags.get(&post.source_key) else {
            return Vec::new();
        };

        let mut ids: Vec<String> = Vec::new();
        for tag in &post.tags {
            let found = available.get(tag).or_else(|| {
                available
                    .iter()
                    .find(|(name, _)| name.to_lowercase() == tag.to_lowercase())
                    .map(|(_, id)| id)
            });
            if let Some(id) = found
                && !ids.contains(id)
            {
                ids.push(id.clone());
            }
            if ids.len() == MAX_TAGS {
                break;
            }
        }
        ids
    }

    fn footer(&self, post: &Post) -> String {
        let mut parts = Vec::new();
        if let Some(author) = &post.author {
            parts.push(author.clone());
        }
        match post.published_at {
            Some(at) => parts.push(format!(
                "{}: {}",
                self.labels.published,
                at.format("%Y.%m.%d %H:%M")
            )),
            None => parts.push(self.source_name(&post.source_key).to_string()),
        }
        parts.join(" • ")
    }

    /// Embed for the thread starter.
    fn post_embed(&self, dispatch: &Dispatch<'_>, images: &[Downloaded]) -> Value {
        let post = dispatch.post;
        let category = post.category_or_default();
        let prefix = if dispatch.classification.is_new() {
            "🆕"
        } else {
            "🔄"
        };

        let mut fields = Vec::new();
        if let Some(changes) = dispatch.reported_changes() {
            fields.push(field(
                &self.labels.change_summary,
                &change_summary(changes, &self.labels),
            ));
        }
        if !post.tags.is_empty() {
            let tags: Vec<String> = post.tags.iter().take(MAX_TAGS).map(|t| format!("`{t}`")).collect();
            fields.push(field(&self.labels.tags, &tags.join(" ")));
        }
        if !post.attachments.is_empty() {
            let links: Vec<String> = post
                .attachments
                .iter()
                .map(|a| format!("{} [{}]({})", file_emoji(&a.name), a.name, a.url))
                .collect();
            fields.push(field(&self.labels.attachments, &links.join("\n")));
        }

        let mut embed = json!({
            "title": format!("{prefix} {} {}", category_emoji(category), truncate(&post.title, TITLE_MAX)),
            "color": category_color(category),
            "url": post.url,
            "footer": { "text": self.footer(post) },
            "timestamp": Utc::now().to_rfc3339(),
            "fields": fields,
        });
        if let Some(summary) = post.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            embed["description"] = json!(truncate(
                &format!("**{}**\n{}", self.labels.summary, bullet_lines(summary)),
                DESCRIPTION_MAX
            ));
        }
        if let [image] = images {
            embed["image"] = json!({ "url": format!("attachment://{}", image.filename) });
        }
        embed
    }

    /// Embed for an update reply inside an existing thread.
    fn update_embed(&self, dispatch: &Dispatch<'_>, images: &[Downloaded]) -> Value {
        let post = dispatch.post;
        let mut fields = Vec::new();
        if let Some(changes) = dispatch.reported_changes() {
            fields.push(field(
                &self.labels.change_summary,
                &change_summary(changes, &self.labels),
            ));
        }
        if let Some(summary) = post.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            fields.push(field(&self.labels.summary, &bullet_lines(summary)));
        }

        let mut embed = json!({
            "title": self.labels.update_title,
            "description": format!("[{}]({})", self.labels.original_link, post.url),
            "color": UPDATE_COLOR,
            "footer": {
                "text": format!("{} • {}", self.source_name(&post.source_key), self.labels.update_footer)
            },
            "timestamp": Utc::now().to_rfc3339(),
            "fields": fields,
        });
        if let [image] = images {
            embed["image"] = json!({ "url": format!("attachment://{}", image.filename) });
        }
        embed
    }

    /// Follow-up embeds after the first, posted into the anchor.
    async fn send_followups(&self, anchor: &Anchor, embeds: &[Value]) {
        for (idx, embed) in embeds.iter().enumerate() {
            let payload = json!({ "embeds": [embed] });
            if let Err(e) = self
                .post_message(
                    "follow-up embed",
                    &anchor.channel,
                    payload,
                    &[],
                    anchor.reply_to.as_deref(),
                )
                .await
            {
                log::warn!("Follow-up embed {} failed: {}", idx + 1, e);
            }
        }
    }
}

fn field(name: &str, value: &str) -> Value {
    json!({
        "name": name,
        "value": truncate(value, FIELD_VALUE_MAX),
        "inline": false,
    })
}

fn text_len(value: &Value, pointer: &str) -> usize {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map_or(0, |s| s.chars().count())
}

fn field_len(field: &Value) -> usize {
    text_len(field, "/name") + text_len(field, "/value")
}

/// Characters Discord counts toward the 6000 limit.
pub fn embed_length(embed: &Value) -> usize {
    let fields = embed
        .get("fields")
        .and_then(Value::as_array)
        .map_or(0, |fields| fields.iter().map(field_len).sum());
    text_len(embed, "/title")
        + text_len(embed, "/description")
        + text_len(embed, "/footer/text")
        + text_len(embed, "/author/name")
        + fields
}

/// Split an oversize embed by moving fields into continuation embeds.
///
/// The first embed keeps title, description and image; continuations carry
/// the colour and a footer marked as continued.
pub fn split_embed(embed: Value, continued: &str) -> Vec<Value> {
    let field_count = embed
        .get("fields")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if embed_length(&embed) <= EMBED_SPLIT_AT && field_count <= MAX_FIELDS {
        return vec![embed];
    }

    let mut first = embed;
    let fields = match first.get_mut("fields").map(Value::take) {
        Some(Value::Array(fields)) => fields,
        _ => Vec::new(),
    };
    first["fields"] = json!([]);

    let footer = format!(
        "{} {}",
        first
            .pointer("/footer/text")
            .and_then(Value::as_str)
            .unwrap_or_default(),
        continued
    )
    .trim()
    .to_string();
    let color = first.get("color").cloned().unwrap_or(Value::Null);

    let mut embeds = Vec::new();
    let mut current = first;
    let mut current_len = embed_length(&current);
    let mut current_fields: Vec<Value> = Vec::new();

    for field in fields {
        let len = field_len(&field);
        let full = current_len + len > EMBED_SPLIT_AT || current_fields.len() == MAX_FIELDS;
        if full && !current_fields.is_empty() {
            current["fields"] = Value::Array(std::mem::take(&mut current_fields));
            embeds.push(current);
            current = json!({ "color": color, "footer": { "text": footer } });
            current_len = footer.chars().count();
        }
        current_len += len;
        current_fields.push(field);
    }
    current["fields"] = Value::Array(current_fields);
    embeds.push(current);
    embeds
}

#[async_trait]
impl PlatformProtocol for ForumDispatcher {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    fn is_stale(&self, error: &AppError) -> bool {
        error.http_status() == Some(404)
    }

    fn detailed_diff(&self) -> bool {
        self.config.detailed_diff
    }

    async fn fetch_images(&self, post: &Post) -> Vec<Downloaded> {
        self.media
            .fetch_images(post, FILES_PER_MESSAGE, FILE_SIZE_LIMIT)
            .await
    }

    async fn create(&self, dispatch: &Dispatch<'_>, images: &[Downloaded]) -> Result<Anchor> {
        let post = dispatch.post;
        let channel_id = self.config.channels.get(&post.source_key).ok_or_else(|| {
            AppError::config(format!("no Discord channel for source '{}'", post.source_key))
        })?;

        let mut embeds = split_embed(self.post_embed(dispatch, images), &self.labels.continued);
        let followups = embeds.split_off(1);
        let main = embeds.remove(0);

        let mut payload = json!({
            "name": truncate(&post.title, THREAD_NAME_MAX),
            "message": { "embeds": [main.clone()] },
            "auto_archive_duration": AUTO_ARCHIVE_MINUTES,
        });
        if dispatch.classification.is_new() {
            let tags = self.match_tags(post);
            if !tags.is_empty() {
                log::debug!("Applying forum tags {:?} -> {:?}", post.tags, tags);
                payload["applied_tags"] = json!(tags);
            }
        }

        let request =
            self.message_request(&format!("channels/{channel_id}/threads"), payload, images);
        let anchor = match self.policy.execute("create thread", &request).await {
            Ok(response) => {
                let thread_id = response.json::<Created>()?.id;
                Anchor {
                    record: thread_id.clone(),
                    channel: thread_id,
                    reply_to: None,
                }
            }
            Err(e) if matches!(e.http_status(), Some(400 | 404)) => {
                log::warn!(
                    "Thread creation rejected in {} ({}); posting a channel message",
                    channel_id,
                    e
                );
                let message_id = self
                    .post_message(
                        "channel message",
                        channel_id,
                        json!({ "embeds": [main] }),
                        images,
                        None,
                    )
                    .await?;
                Anchor {
                    record: format!("{channel_id}/{message_id}"),
                    channel: channel_id.clone(),
                    reply_to: Some(message_id),
                }
            }
            Err(e) => return Err(e),
        };

        self.send_followups(&anchor, &followups).await;
        Ok(anchor)
    }

    async fn reply(
        &self,
        dispatch: &Dispatch<'_>,
        record: &DeliveryRecord,
        images: &[Downloaded],
    ) -> Result<Anchor> {
        let mut embeds = split_embed(self.update_embed(dispatch, images), &self.labels.continued);
        let followups = embeds.split_off(1);
        let payload = json!({ "embeds": embeds });

        // `channel/message` marks a plain channel message, anything else is a thread
        let (channel, reply_to) = match record.message_id.split_once('/') {
            Some((channel, message)) => (channel, Some(message)),
            None => (record.message_id.as_str(), None),
        };
        self.post_message("update reply", channel, payload, images, reply_to).await?;

        let anchor = Anchor {
            record: record.message_id.clone(),
            channel: channel.to_string(),
            reply_to: reply_to.map(str::to_string),
        };
        self.send_followups(&anchor, &followups).await;
        Ok(anchor)
    }

    async fn send_previews(&self, dispatch: &Dispatch<'_>, anchor: &Anchor) -> Result<()> {
        for attachment in dispatch.post.attachments.iter() {
            if attachment.previews.is_empty() {
                continue;
            }
            let chunks: Vec<_> = attachment.previews.chunks(FILES_PER_MESSAGE).collect();
            for (chunk_idx, chunk) in chunks.iter().enumerate() {
                let caption = if chunks.len() > 1 {
                    format!(
                        "{} {} ({}/{})",
                        self.labels.preview,
                        attachment.name,
                        chunk_idx + 1,
                        chunks.len()
                    )
                } else {
                    format!("{} {}", self.labels.preview, attachment.name)
                };
                let files: Vec<Downloaded> = chunk
                    .iter()
                    .enumerate()
                    .map(|(idx, bytes)| Downloaded {
                        filename: format!(
                            "preview_p{}.jpg",
                            chunk_idx * FILES_PER_MESSAGE + idx + 1
                        ),
                        bytes: bytes.clone(),
                    })
                    .collect();
                self.post_message(
                    "preview",
                    &anchor.channel,
                    json!({ "content": caption }),
                    &files,
                    anchor.reply_to.as_deref(),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn send_files(&self, dispatch: &Dispatch<'_>, anchor: &Anchor) -> Result<()> {
        let files = self
            .media
            .fetch_files(dispatch.post, FILES_PER_MESSAGE, FILE_SIZE_LIMIT)
            .await;
        for batch in files.chunks(FILES_PER_MESSAGE) {
            self.post_message(
                "attachments",
                &anchor.channel,
                json!({}),
                batch,
                anchor.reply_to.as_deref(),
            )
            .await?;
        }
        Ok(())
    }

    async fn send_diff(&self, _dispatch: &Dispatch<'_>, anchor: &Anchor, diff: &str) -> Result<()> {
        let chunks = chunk_text(diff, DIFF_CHUNK);
        let fields: Vec<Value> = chunks
            .iter()
            .enumerate()
            .map(|(idx, chunk)| {
                let name = if chunks.len() > 1 {
                    format!("{} ({}/{})", self.labels.diff, idx + 1, chunks.len())
                } else {
                    self.labels.diff.clone()
                };
                json!({ "name": name, "value": format!("```diff\n{chunk}\n```"), "inline": false })
            })
            .collect();

        let embed = json!({ "color": UPDATE_COLOR, "fields": fields });
        for embed in split_embed(embed, &self.labels.continued) {
            self.post_message(
                "diff",
                &anchor.channel,
                json!({ "embeds": [embed] }),
                &[],
                anchor.reply_to.as_deref(),
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for ForumDispatcher {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    fn handles(&self, source_key: &str) -> bool {
        self.config.channels.contains_key(source_key)
    }

    async fn dispatch(&self, dispatch: &Dispatch<'_>) -> Result<DeliveryRecord> {
        run_protocol(self, dispatch).await
    }
}
