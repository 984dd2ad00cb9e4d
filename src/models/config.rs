//! Application configuration structures.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry and backoff for outbound calls
    #[serde(default)]
    pub transport: TransportConfig,

    /// Attachment download and preview limits
    #[serde(default)]
    pub attachments: AttachmentConfig,

    /// Run loop behavior
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Summarizer/analyzer endpoint. AI features are off without it.
    #[serde(default)]
    pub ai: Option<AiConfig>,

    #[serde(default)]
    pub discord: Option<DiscordConfig>,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    /// User-facing notification strings
    #[serde(default)]
    pub labels: Labels,

    /// Content sources to watch
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            let mut config = Self::default();
            config.apply_env();
            config
        })
    }

    /// Bot tokens from the environment take precedence over the file.
    pub fn apply_env(&mut self) {
        if let Some(discord) = self.discord.as_mut()
            && let Ok(token) = std::env::var("DISCORD_BOT_TOKEN")
            && !token.trim().is_empty()
        {
            discord.bot_token = token;
        }
        if let Some(telegram) = self.telegram.as_mut()
            && let Ok(token) = std::env::var("TELEGRAM_TOKEN")
            && !token.trim().is_empty()
        {
            telegram.bot_token = token;
        }
    }

    /// Find a source by key.
    pub fn source(&self, key: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.key == key)
    }

    /// Display name for a source key, falling back to the key itself.
    pub fn display_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.source(key).map(|s| s.display_name.as_str()).unwrap_or(key)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.download_timeout_secs == 0 {
            return Err(AppError::validation(
                "http.download_timeout_secs must be > 0",
            ));
        }
        if self.transport.max_attempts == 0 {
            return Err(AppError::validation("transport.max_attempts must be > 0"));
        }
        if self.transport.base_delay_ms > self.transport.max_delay_ms {
            return Err(AppError::validation(
                "transport.base_delay_ms must not exceed transport.max_delay_ms",
            ));
        }
        if self.attachments.max_concurrent == 0 {
            return Err(AppError::validation(
                "attachments.max_concurrent must be > 0",
            ));
        }
        if self.pipeline.recent_limit == 0 {
            return Err(AppError::validation("pipeline.recent_limit must be > 0"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.key.trim().is_empty() {
                return Err(AppError::validation("sources[].key is empty"));
            }
            if source.key.contains(':') {
                return Err(AppError::validation(format!(
                    "source key '{}' must not contain ':'",
                    source.key
                )));
            }
            if !seen.insert(source.key.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate source key '{}'",
                    source.key
                )));
            }
            if source.feed.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "source '{}' has no feed",
                    source.key
                )));
            }
        }

        if let Some(discord) = &self.discord {
            if discord.bot_token.trim().is_empty() {
                return Err(AppError::validation(
                    "discord.bot_token is empty (set DISCORD_BOT_TOKEN)",
                ));
            }
            if discord.channels.is_empty() {
                return Err(AppError::validation("discord.channels is empty"));
            }
        }
        if let Some(telegram) = &self.telegram {
            if telegram.bot_token.trim().is_empty() {
                return Err(AppError::validation(
                    "telegram.bot_token is empty (set TELEGRAM_TOKEN)",
                ));
            }
            if telegram.chat_id.trim().is_empty() {
                return Err(AppError::validation("telegram.chat_id is empty"));
            }
        }
        if let Some(ai) = &self.ai
            && ai.endpoint.trim().is_empty()
        {
            return Err(AppError::validation("ai.endpoint is empty"));
        }
        Ok(())
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Longer timeout for attachment and image downloads
    #[serde(default = "defaults::download_timeout")]
    pub download_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            download_timeout_secs: defaults::download_timeout(),
        }
    }
}

/// Retry settings shared by every outbound call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Attempts per call, including the first
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles per attempt
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for computed backoff (server hints may exceed it)
    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay(),
            max_delay_ms: defaults::max_delay(),
        }
    }
}

/// Attachment processing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentConfig {
    /// Concurrent downloads per post
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Attachments processed per post
    #[serde(default = "defaults::max_attachments")]
    pub max_attachments: usize,

    /// Attachments per post that get rendered previews
    #[serde(default = "defaults::max_previews")]
    pub max_previews: usize,

    /// Preview pages kept per attachment
    #[serde(default = "defaults::max_preview_pages")]
    pub max_preview_pages: usize,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
            max_attachments: defaults::max_attachments(),
            max_previews: defaults::max_previews(),
            max_preview_pages: defaults::max_preview_pages(),
        }
    }
}

/// Run loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Fingerprints loaded per source for the short-circuit check
    #[serde(default = "defaults::recent_limit")]
    pub recent_limit: usize,

    /// Bodies shorter than this with no media are skipped
    #[serde(default = "defaults::min_body_length")]
    pub min_body_length: usize,

    /// Pause after each notified post
    #[serde(default = "defaults::post_delay")]
    pub post_delay_ms: u64,

    /// Summarizer calls allowed per run
    #[serde(default = "defaults::max_summaries")]
    pub max_summaries_per_run: usize,

    /// Pause between runs in watch mode
    #[serde(default = "defaults::scrape_interval")]
    pub scrape_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recent_limit: defaults::recent_limit(),
            min_body_length: defaults::min_body_length(),
            post_delay_ms: defaults::post_delay(),
            max_summaries_per_run: defaults::max_summaries(),
            scrape_interval_secs: defaults::scrape_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the post repository
    #[serde(default = "defaults::root_dir")]
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `env_logger` filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// HTTP endpoint serving `/summarize` and `/analyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Discord forum delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,

    #[serde(default = "defaults::discord_api")]
    pub api_base: String,

    /// Source key to forum channel id
    #[serde(default)]
    pub channels: BTreeMap<String, String>,

    /// Source key to (tag name to forum tag id)
    #[serde(default)]
    pub tags: BTreeMap<String, BTreeMap<String, String>>,

    /// Send a line diff after modified posts
    #[serde(default = "defaults::enabled")]
    pub detailed_diff: bool,
}

/// Telegram chat delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,

    #[serde(default = "defaults::telegram_api")]
    pub api_base: String,

    #[serde(default)]
    pub chat_id: String,

    /// Source key to forum topic id
    #[serde(default)]
    pub topics: BTreeMap<String, i64>,

    /// Send a line diff after modified posts
    #[serde(default = "defaults::enabled")]
    pub detailed_diff: bool,
}

/// A watched content source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub key: String,

    /// Name shown in footers and hashtags
    #[serde(default)]
    pub display_name: String,

    /// URL or file path of a JSON post feed
    pub feed: String,
}

/// Notification strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Labels {
    #[serde(default = "defaults::label_update_title")]
    pub update_title: String,
    #[serde(default = "defaults::label_update_footer")]
    pub update_footer: String,
    #[serde(default = "defaults::label_change_summary")]
    pub change_summary: String,
    #[serde(default = "defaults::label_title_changed")]
    pub title_changed: String,
    #[serde(default = "defaults::label_content_changed")]
    pub content_changed: String,
    #[serde(default = "defaults::label_attachment_added")]
    pub attachment_added: String,
    #[serde(default = "defaults::label_attachment_removed")]
    pub attachment_removed: String,
    #[serde(default = "defaults::label_attachments_changed")]
    pub attachments_changed: String,
    #[serde(default = "defaults::label_images_changed")]
    pub images_changed: String,
    #[serde(default = "defaults::label_content_placeholder")]
    pub content_placeholder: String,
    #[serde(default = "defaults::label_summary")]
    pub summary: String,
    #[serde(default = "defaults::label_attachments")]
    pub attachments: String,
    #[serde(default = "defaults::label_tags")]
    pub tags: String,
    #[serde(default = "defaults::label_author")]
    pub author: String,
    #[serde(default = "defaults::label_published")]
    pub published: String,
    #[serde(default = "defaults::label_original_link")]
    pub original_link: String,
    #[serde(default = "defaults::label_diff")]
    pub diff: String,
    #[serde(default = "defaults::label_preview")]
    pub preview: String,
    #[serde(default = "defaults::label_continued")]
    pub continued: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            update_title: defaults::label_update_title(),
            update_footer: defaults::label_update_footer(),
            change_summary: defaults::label_change_summary(),
            title_changed: defaults::label_title_changed(),
            content_changed: defaults::label_content_changed(),
            attachment_added: defaults::label_attachment_added(),
            attachment_removed: defaults::label_attachment_removed(),
            attachments_changed: defaults::label_attachments_changed(),
            images_changed: defaults::label_images_changed(),
            content_placeholder: defaults::label_content_placeholder(),
            summary: defaults::label_summary(),
            attachments: defaults::label_attachments(),
            tags: defaults::label_tags(),
            author: defaults::label_author(),
            published: defaults::label_published(),
            original_link: defaults::label_original_link(),
            diff: defaults::label_diff(),
            preview: defaults::label_preview(),
            continued: defaults::label_continued(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; notice-relay/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn download_timeout() -> u64 {
        60
    }

    // Transport defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn base_delay() -> u64 {
        500
    }
    pub fn max_delay() -> u64 {
        30_000
    }

    // Attachment defaults
    pub fn max_concurrent() -> usize {
        2
    }
    pub fn max_attachments() -> usize {
        10
    }
    pub fn max_previews() -> usize {
        10
    }
    pub fn max_preview_pages() -> usize {
        20
    }

    // Pipeline defaults
    pub fn recent_limit() -> usize {
        1000
    }
    pub fn min_body_length() -> usize {
        10
    }
    pub fn post_delay() -> u64 {
        500
    }
    pub fn max_summaries() -> usize {
        50
    }
    pub fn scrape_interval() -> u64 {
        600
    }

    pub fn root_dir() -> PathBuf {
        PathBuf::from("data")
    }
    pub fn log_level() -> String {
        "info".into()
    }

    // Platform defaults
    pub fn discord_api() -> String {
        "https://discord.com/api/v10".into()
    }
    pub fn telegram_api() -> String {
        "https://api.telegram.org".into()
    }
    pub fn enabled() -> bool {
        true
    }

    // Label defaults
    pub fn label_update_title() -> String {
        "⚠️ 공지사항 수정 알림".into()
    }
    pub fn label_update_footer() -> String {
        "업데이트됨".into()
    }
    pub fn label_change_summary() -> String {
        "🔄 변경 요약".into()
    }
    pub fn label_title_changed() -> String {
        "📝 **제목 변경**".into()
    }
    pub fn label_content_changed() -> String {
        "📝 **내용 변경**".into()
    }
    pub fn label_attachment_added() -> String {
        "➕ **첨부 추가**".into()
    }
    pub fn label_attachment_removed() -> String {
        "➖ **첨부 삭제**".into()
    }
    pub fn label_attachments_changed() -> String {
        "📎 **첨부파일 변경**".into()
    }
    pub fn label_images_changed() -> String {
        "🖼️ **이미지 변경됨**".into()
    }
    pub fn label_content_placeholder() -> String {
        "내용 변경됨".into()
    }
    pub fn label_summary() -> String {
        "📝 요약".into()
    }
    pub fn label_attachments() -> String {
        "📎 첨부파일".into()
    }
    pub fn label_tags() -> String {
        "🏷️ 태그".into()
    }
    pub fn label_author() -> String {
        "✍️ 작성자".into()
    }
    pub fn label_published() -> String {
        "작성일".into()
    }
    pub fn label_original_link() -> String {
        "원본 공지 보러가기".into()
    }
    pub fn label_diff() -> String {
        "🔍 상세 변경 내용".into()
    }
    pub fn label_preview() -> String {
        "📑 [미리보기]".into()
    }
    pub fn label_continued() -> String {
        "(계속)".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(key: &str) -> SourceConfig {
        SourceConfig {
            key: key.into(),
            display_name: "컴공공지".into(),
            feed: "feeds/cse.json".into(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.max_attempts, 3);
        assert_eq!(config.attachments.max_concurrent, 2);
        assert_eq!(config.pipeline.min_body_length, 10);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [telegram]
            bot_token = "t"
            chat_id = "-100123"

            [telegram.topics]
            cse_notice = 7

            [[sources]]
            key = "cse_notice"
            display_name = "컴공공지"
            feed = "https://example.com/feed.json"
            "#,
        )
        .unwrap();

        let telegram = config.telegram.as_ref().unwrap();
        assert_eq!(telegram.api_base, "https://api.telegram.org");
        assert!(telegram.detailed_diff);
        assert_eq!(telegram.topics.get("cse_notice"), Some(&7));
        assert_eq!(config.display_name("cse_notice"), "컴공공지");
        assert_eq!(config.display_name("unknown"), "unknown");
        assert_eq!(config.labels.content_placeholder, "내용 변경됨");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_sources() {
        let config = Config {
            sources: vec![source("a"), source("a")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_platform_without_target() {
        let config = Config {
            discord: Some(DiscordConfig {
                bot_token: "x".into(),
                api_base: "https://discord.com/api/v10".into(),
                channels: BTreeMap::new(),
                tags: BTreeMap::new(),
                detailed_diff: true,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.transport.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default("/nonexistent/relay.toml");
        assert_eq!(config.http.timeout_secs, 30);
    }
}
