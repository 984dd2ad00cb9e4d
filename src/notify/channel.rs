//! Telegram channels and supergroups (Bot API).
//!
//! Telegram has no threads here: a new post is a standalone message, an
//! update is a message replying to the original, and every follow-up
//! (previews, files, diff) replies to the message it belongs to. Topics in
//! forum supergroups are selected per source through `message_thread_id`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::format::{bullet_lines, category_emoji, change_summary, file_emoji, hashtag};
use super::media::{Downloaded, MediaFetcher};
use super::transport::{ApiRequest, FormPart, TransportPolicy};
use super::{Anchor, Dispatch, NotificationChannel, PlatformProtocol, run_protocol};
use crate::error::{AppError, Result};
use crate::models::{DeliveryRecord, Labels, Platform, Post, TelegramConfig};
use crate::pipeline::diff::{chunk_text, truncate};

const MESSAGE_MAX: usize = 4096;
const CAPTION_MAX: usize = 1024;
/// Leaves room for the header and HTML escapes
const DIFF_CHUNK: usize = 3500;
const MEDIA_PER_GROUP: usize = 10;
const FILE_SIZE_LIMIT: u64 = 50 * 1024 * 1024;
const BUTTON_NAME_MAX: usize = 20;
const MAX_HASHTAGS: usize = 5;

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Value,
    description: Option<String>,
}

/// Delivers posts to a Telegram chat.
pub struct ChannelDispatcher {
    config: TelegramConfig,
    labels: Labels,
    source_names: HashMap<String, String>,
    policy: TransportPolicy,
    media: MediaFetcher,
}

impl ChannelDispatcher {
    pub fn new(
        config: TelegramConfig,
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

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    fn source_name<'a>(&'a self, source_key: &'a str) -> &'a str {
        self.source_names
            .get(source_key)
            .map(String::as_str)
            .unwrap_or(source_key)
    }

    /// Chat, topic and reply target shared by every send.
    fn params(&self, source_key: &str, reply_to: Option<&str>) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("chat_id".into(), json!(self.config.chat_id));
        if let Some(topic) = self.config.topics.get(source_key) {
            params.insert("message_thread_id".into(), json!(topic));
        }
        if let Some(message_id) = reply_to {
            params.insert("reply_to_message_id".into(), id_value(message_id));
        }
        params
    }

    async fn call(&self, method: &str, request: ApiRequest) -> Result<Value> {
        let response = self.policy.execute(method, &request).await?;
        let envelope: Envelope = response.json()?;
        if !envelope.ok {
            return Err(AppError::protocol(
                method,
                envelope.description.unwrap_or_else(|| "ok=false".into()),
            ));
        }
        Ok(envelope.result)
    }

    async fn call_json(&self, method: &str, params: Map<String, Value>) -> Result<Value> {
        let request = ApiRequest::post_json(self.method_url(method), Value::Object(params));
        self.call(method, request).await
    }

    async fn call_multipart(
        &self,
        method: &str,
        params: Map<String, Value>,
        files: Vec<FormPart>,
    ) -> Result<Value> {
        let mut parts: Vec<FormPart> = params
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(text) => FormPart::text(name, text),
                other => FormPart::text(name, other.to_string()),
            })
            .collect();
        parts.extend(files);
        let request = ApiRequest::post_multipart(self.method_url(method), parts);
        self.call(method, request).await
    }

    /// One photo via `sendPhoto`, several via `sendMediaGroup` with the
    /// caption on the first item.
    async fn send_photos(
        &self,
        mut params: Map<String, Value>,
        photos: &[Downloaded],
        caption: Option<&str>,
    ) -> Result<Value> {
        if let [photo] = photos {
            if let Some(caption) = caption {
                params.insert("caption".into(), json!(caption));
                params.insert("parse_mode".into(), json!("HTML"));
            }
            let file = FormPart::file("photo", photo.filename.clone(), photo.bytes.clone());
            return self.call_multipart("sendPhoto", params, vec![file]).await;
        }
        self.send_group(params, "photo", photos, caption).await
    }

    async fn send_group(
        &self,
        mut params: Map<String, Value>,
        kind: &str,
        items: &[Downloaded],
        caption: Option<&str>,
    ) -> Result<Value> {
        let mut media = Vec::new();
        let mut files = Vec::new();
        for (idx, item) in items.iter().take(MEDIA_PER_GROUP).enumerate() {
            let field = format!("{kind}{idx}");
            let mut entry = json!({ "type": kind, "media": format!("attach://{field}") });
            if idx == 0
                && let Some(caption) = caption
            {
                entry["caption"] = json!(caption);
                entry["parse_mode"] = json!("HTML");
            }
            media.push(entry);
            files.push(FormPart::file(field, item.filename.clone(), item.bytes.clone()));
        }
        params.insert("media".into(), Value::Array(media).to_string().into());
        self.call_multipart("sendMediaGroup", params, files).await
    }

    /// Text message, photo or photo album carrying the post.
    async fn send_primary(
        &self,
        dispatch: &Dispatch<'_>,
        images: &[Downloaded],
        reply_to: Option<&str>,
    ) -> Result<String> {
        let post = dispatch.post;
        let text = self.message_text(dispatch);
        let mut params = self.params(&post.source_key, reply_to);

        let result = if images.is_empty() {
            params.insert("text".into(), json!(text));
            params.insert("parse_mode".into(), json!("HTML"));
            params.insert("disable_web_page_preview".into(), json!(true));
            if let Some(keyboard) = self.keyboard(post) {
                params.insert("reply_markup".into(), keyboard);
            }
            self.call_json("sendMessage", params).await?
        } else {
            let caption = if text.chars().count() <= CAPTION_MAX {
                text
            } else {
                self.headline(dispatch)
            };
            if let ([_], Some(keyboard)) = (images, self.keyboard(post)) {
                params.insert("reply_markup".into(), json!(keyboard.to_string()));
            }
            self.send_photos(params, images, Some(caption.as_str())).await?
        };

        message_id(&result)
    }

    /// One URL button per attachment.
    fn keyboard(&self, post: &Post) -> Option<Value> {
        if post.attachments.is_empty() {
            return None;
        }
        let rows: Vec<Value> = post
            .attachments
            .iter()
            .map(|a| {
                let label = format!("{} {}", file_emoji(&a.name), truncate(&a.name, BUTTON_NAME_MAX));
                json!([{ "text": label, "url": a.url }])
            })
            .collect();
        Some(json!({ "inline_keyboard": rows }))
    }

    fn headline(&self, dispatch: &Dispatch<'_>) -> String {
        let post = dispatch.post;
        let prefix = if dispatch.classification.is_new() {
            "🆕"
        } else {
            "🔄"
        };
        format!(
            "{} <a href=\"{}\"><b>{} {}</b></a>",
            prefix,
            html_escape::encode_double_quoted_attribute(&post.url),
            category_emoji(post.category_or_default()),
            html_escape::encode_text(&post.title)
        )
    }

    fn hashtags(&self, post: &Post) -> String {
        let mut tags: Vec<String> = if post.tags.is_empty() {
            vec![hashtag(post.category_or_default())]
        } else {
            post.tags.iter().take(MAX_HASHTAGS).map(|t| hashtag(t)).collect()
        };
        tags.push(hashtag(self.source_name(&post.source_key)));
        html_escape::encode_text(&tags.join(" ")).into_owned()
    }

    fn compose(&self, dispatch: &Dispatch<'_>, summary: Option<&str>) -> String {
        let post = dispatch.post;
        let mut sections = vec![self.headline(dispatch)];

        if let Some(changes) = dispatch.reported_changes() {
            sections.push(format!(
                "<b>{}</b>\n{}",
                html_escape::encode_text(&self.labels.change_summary),
                markdown_bold(&html_escape::encode_text(&change_summary(changes, &self.labels)))
            ));
        }
        if let Some(summary) = summary {
            sections.push(format!(
                "<b>{}</b>\n{}",
                html_escape::encode_text(&self.labels.summary),
                html_escape::encode_text(&bullet_lines(summary))
            ));
        }

        let mut details = Vec::new();
        if let Some(author) = &post.author {
            details.push(format!(
                "<b>{}</b>: {}",
                html_escape::encode_text(&self.labels.author),
                html_escape::encode_text(author)
            ));
        }
        if let Some(at) = post.published_at {
            details.push(format!(
                "📅 <b>{}</b>: {}",
                html_escape::encode_text(&self.labels.published),
                at.format("%Y.%m.%d %H:%M")
            ));
        }
        if !details.is_empty() {
            sections.push(details.join("\n"));
        }

        sections.push(self.hashtags(post));
        sections.join("\n\n")
    }

    /// Message HTML, shortening the summary to stay under the message limit.
    pub fn message_text(&self, dispatch: &Dispatch<'_>) -> String {
        let summary = dispatch
            .post
            .summary
            .as_deref()
            .filter(|s| !s.trim().is_empty());

        let full = self.compose(dispatch, summary);
        let Some(summary) = summary else {
            return self.fit(dispatch, full);
        };

        let mut text = full;
        let mut limit = summary.chars().count();
        while text.chars().count() > MESSAGE_MAX && limit > 0 {
            let overflow = text.chars().count() - MESSAGE_MAX;
            limit = limit.saturating_sub(overflow);
            text = self.compose(dispatch, Some(&truncate(summary, limit)));
        }
        self.fit(dispatch, text)
    }

    fn fit(&self, dispatch: &Dispatch<'_>, text: String) -> String {
        if text.chars().count() <= MESSAGE_MAX {
            text
        } else {
            self.headline(dispatch)
        }
    }
}

/// Replace `**bold**` pairs with `<b>` tags. Unbalanced markers are left alone.
pub fn markdown_bold(text: &str) -> String {
    let parts: Vec<&str> = text.split("**").collect();
    if parts.len() % 2 == 0 {
        return text.to_string();
    }
    parts
        .iter()
        .enumerate()
        .map(|(idx, part)| {
            if idx % 2 == 1 {
                format!("<b>{part}</b>")
            } else {
                part.to_string()
            }
        })
        .collect()
}

fn id_value(id: &str) -> Value {
    id.parse::<i64>().map_or_else(|_| json!(id), |n| json!(n))
}

/// Message id of a single message or the first message of an album.
fn message_id(result: &Value) -> Result<String> {
    result
        .get("message_id")
        .or_else(|| result.get(0).and_then(|first| first.get("message_id")))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .ok_or_else(|| AppError::protocol("telegram", "response carried no message_id"))
}

#[async_trait]
impl PlatformProtocol for ChannelDispatcher {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    fn is_stale(&self, error: &AppError) -> bool {
        match error {
            AppError::Status { status: 404, .. } => true,
            AppError::Status {
                status: 400, body, ..
            } => {
                let body = body.to_lowercase();
                body.contains("replied") && body.contains("not found")
            }
            _ => false,
        }
    }

    fn detailed_diff(&self) -> bool {
        self.config.detailed_diff
    }

    async fn fetch_images(&self, post: &Post) -> Vec<Downloaded> {
        self.media
            .fetch_images(post, MEDIA_PER_GROUP, FILE_SIZE_LIMIT)
            .await
    }

    async fn create(&self, dispatch: &Dispatch<'_>, images: &[Downloaded]) -> Result<Anchor> {
        let id = self.send_primary(dispatch, images, None).await?;
        Ok(Anchor {
            record: id.clone(),
            channel: self.config.chat_id.clone(),
            reply_to: Some(id),
        })
    }

    async fn reply(
        &self,
        dispatch: &Dispatch<'_>,
        record: &DeliveryRecord,
        images: &[Downloaded],
    ) -> Result<Anchor> {
        let id = self
            .send_primary(dispatch, images, Some(&record.message_id))
            .await?;
        // The original message stays the record so later updates keep replying to it
        Ok(Anchor {
            record: record.message_id.clone(),
            channel: self.config.chat_id.clone(),
            reply_to: Some(id),
        })
    }

    async fn send_previews(&self, dispatch: &Dispatch<'_>, anchor: &Anchor) -> Result<()> {
        let post = dispatch.post;
        for attachment in &post.attachments {
            if attachment.previews.is_empty() {
                continue;
            }
            let caption = format!(
                "{} {}",
                html_escape::encode_text(&self.labels.preview),
                html_escape::encode_text(&attachment.name)
            );
            for (chunk_idx, chunk) in attachment.previews.chunks(MEDIA_PER_GROUP).enumerate() {
                let pages: Vec<Downloaded> = chunk
                    .iter()
                    .enumerate()
                    .map(|(idx, bytes)| Downloaded {
                        filename: format!("preview_p{}.jpg", chunk_idx * MEDIA_PER_GROUP + idx + 1),
                        bytes: bytes.clone(),
                    })
                    .collect();
                let params = self.params(&post.source_key, anchor.reply_to.as_deref());
                let caption = (chunk_idx == 0).then_some(caption.as_str());
                self.send_photos(params, &pages, caption).await?;
            }
        }
        Ok(())
    }

    async fn send_files(&self, dispatch: &Dispatch<'_>, anchor: &Anchor) -> Result<()> {
        let post = dispatch.post;
        let files = self
            .media
            .fetch_files(post, MEDIA_PER_GROUP, FILE_SIZE_LIMIT)
            .await;
        let params = self.params(&post.source_key, anchor.reply_to.as_deref());

        match files.as_slice() {
            [] => Ok(()),
            [file] => {
                let part = FormPart::file("document", file.filename.clone(), file.bytes.clone());
                self.call_multipart("sendDocument", params, vec![part])
                    .await
                    .map(|_| ())
            }
            many => self
                .send_group(params, "document", many, None)
                .await
                .map(|_| ()),
        }
    }

    async fn send_diff(&self, dispatch: &Dispatch<'_>, anchor: &Anchor, diff: &str) -> Result<()> {
        let chunks = chunk_text(diff, DIFF_CHUNK);
        for (idx, chunk) in chunks.iter().enumerate() {
            let header = if chunks.len() > 1 {
                format!("{} ({}/{})", self.labels.diff, idx + 1, chunks.len())
            } else {
                self.labels.diff.clone()
            };
            let mut params = self.params(&dispatch.post.source_key, anchor.reply_to.as_deref());
            params.insert(
                "text".into(),
                json!(format!(
                    "<b>{}</b>\n<pre>{}</pre>",
                    html_escape::encode_text(&header),
                    html_escape::encode_text(chunk)
                )),
            );
            params.insert("parse_mode".into(), json!("HTML"));
            self.call_json("sendMessage", params).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for ChannelDispatcher {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    fn handles(&self, _source_key: &str) -> bool {
        true
    }

    async fn dispatch(&self, dispatch: &Dispatch<'_>) -> Result<DeliveryRecord> {
        run_protocol(self, dispatch).await
    }
}
