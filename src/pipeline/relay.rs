// src/pipeline/relay.rs

//! The per-run loop: fetch, classify, enrich, diff, dispatch, commit.
//!
//! Sources are processed one after another and posts oldest first. A post's
//! state is committed only after at least one platform accepted it (or no
//! platform applies), so a post that failed everywhere is retried on the next
//! run. Platforms that rejected a committed post are stored as pending and get
//! the post as new on a later run. No error escapes the per-post loop;
//! failures end up in [`RunSummary`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{AppError, ErrorKind, Result};
use crate::models::{
    ChangeSet, Classification, Config, DeliveryRecord, Platform, Post, RecordId, SourceConfig,
    StoredPost,
};
use crate::notify::{
    Dispatch, MediaFetcher, NotificationChannel, ReqwestTransport, TransportPolicy,
    build_channels,
};
use crate::services::{
    Analyzer, AttachmentProcessor, BudgetedSummarizer, FreshnessProbe, HttpAiService, HttpProbe,
    JsonFeedSource, NoPreviews, PostSource, Repository, Summarizer, SummaryBudget,
};
use crate::storage::LocalStorage;
use crate::utils::http::create_async_client;
use crate::utils::log as banner;

use super::changeset::ChangeSetBuilder;
use super::classify::ChangeClassifier;
use super::fingerprint::fingerprint;

/// How a run treats fetched posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Normal,
    /// Store everything without analysis or notifications
    Seed,
}

/// A post that could not be processed.
#[derive(Debug, Clone)]
pub struct PostFailure {
    pub source: String,
    /// `None` when the whole source failed
    pub external_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

/// Counts and failures of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub fetched: usize,
    pub new: usize,
    pub modified: usize,
    pub unchanged: usize,
    /// Rejected by the content sanity gate
    pub skipped: usize,
    pub seeded: usize,
    /// Modified posts whose change set was empty; stored without notifying
    pub refreshed: usize,
    /// Posts delivered to at least one platform
    pub notified: usize,
    /// Unchanged posts re-sent to platforms that missed them
    pub retried: usize,
    pub failures: Vec<PostFailure>,
    /// Stopped early by the shutdown flag
    pub interrupted: bool,
}

impl RunSummary {
    /// Rows for the end-of-run summary.
    pub fn items(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Fetched", self.fetched.to_string()),
            ("New", self.new.to_string()),
            ("Modified", self.modified.to_string()),
            ("Unchanged", self.unchanged.to_string()),
            ("Skipped", self.skipped.to_string()),
            ("Seeded", self.seeded.to_string()),
            ("Refreshed", self.refreshed.to_string()),
            ("Notified", self.notified.to_string()),
            ("Retried", self.retried.to_string()),
            ("Failures", self.failures.len().to_string()),
        ]
    }

    fn fail(&mut self, source: &str, external_id: Option<&str>, error: &AppError) {
        self.failures.push(PostFailure {
            source: source.to_string(),
            external_id: external_id.map(str::to_string),
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

enum Outcome {
    Skipped,
    Seeded,
    Unchanged,
    Refreshed,
    Delivered {
        classification: Classification,
        delivered: usize,
    },
    Retried {
        delivered: usize,
    },
}

/// Result of sending one post to the applicable platforms.
#[derive(Debug, Default)]
struct Delivery {
    records: Vec<DeliveryRecord>,
    failed: Vec<Platform>,
}

/// Orchestrates one or more runs over the configured sources.
pub struct Relay {
    config: Arc<Config>,
    source: Arc<dyn PostSource>,
    repo: Arc<dyn Repository>,
    probe: Arc<dyn FreshnessProbe>,
    summarizer: Option<Arc<dyn Summarizer>>,
    analyzer: Option<Arc<dyn Analyzer>>,
    attachments: Option<AttachmentProcessor>,
    channels: Vec<Box<dyn NotificationChannel>>,
    budget: Arc<SummaryBudget>,
    shutdown: Arc<AtomicBool>,
}

impl Relay {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn PostSource>,
        repo: Arc<dyn Repository>,
        probe: Arc<dyn FreshnessProbe>,
    ) -> Self {
        let budget = Arc::new(SummaryBudget::new(config.pipeline.max_summaries_per_run));
        Self {
            config,
            source,
            repo,
            probe,
            summarizer: None,
            analyzer: None,
            attachments: None,
            channels: Vec::new(),
            budget,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire the production adapters described by `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let client = create_async_client(&config.http)?;
        let policy = TransportPolicy::new(
            Arc::new(ReqwestTransport::new(client)),
            &config.transport,
        );
        let download_timeout = Duration::from_secs(config.http.download_timeout_secs);
        let media = MediaFetcher::new(policy.clone(), download_timeout);
        let probe: Arc<dyn FreshnessProbe> =
            Arc::new(HttpProbe::new(policy.clone(), download_timeout));

        let mut relay = Self::new(
            config.clone(),
            Arc::new(JsonFeedSource::new(
                policy.clone(),
                Duration::from_secs(config.http.timeout_secs),
            )),
            Arc::new(LocalStorage::new(&config.storage.root_dir)),
            probe.clone(),
        )
        .with_attachments(AttachmentProcessor::new(
            media.clone(),
            Arc::new(NoPreviews),
            probe,
            config.attachments.clone(),
        ))
        .with_channels(build_channels(&config, &policy, &media));

        if let Some(ai) = &config.ai {
            let service = Arc::new(HttpAiService::new(policy.clone(), ai));
            relay = relay
                .with_summarizer(service.clone())
                .with_analyzer(service);
        } else {
            log::info!("No [ai] section; change summaries use the placeholder");
        }
        Ok(relay)
    }

    /// Use `summarizer` for body changes, limited by the per-run budget.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(Arc::new(BudgetedSummarizer::new(
            summarizer,
            self.budget.clone(),
        )));
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_attachments(mut self, processor: AttachmentProcessor) -> Self {
        self.attachments = Some(processor);
        self
    }

    pub fn with_channels(mut self, channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        self.channels = channels;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flag checked between posts. Setting it stops the current run.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Process every configured source, or only `only` when given.
    pub async fn run(&self, only: Option<&str>, mode: RunMode) -> Result<RunSummary> {
        let sources: Vec<&SourceConfig> = match only {
            Some(key) => vec![
                self.config
                    .source(key)
                    .ok_or_else(|| AppError::config(format!("unknown source '{key}'")))?,
            ],
            None => self.config.sources.iter().collect(),
        };

        self.budget.reset();
        let mut summary = RunSummary::default();
        banner::header(match mode {
            RunMode::Normal => "Relaying notices",
            RunMode::Seed => "Seeding stored posts",
        });

        for source in sources {
            if self.stopping() {
                summary.interrupted = true;
                break;
            }
            self.run_source(source, mode, &mut summary).await;
        }

        if self.budget.used() > 0 {
            log::debug!("Summarizer calls this run: {}", self.budget.used());
        }
        banner::summary("Run complete", &summary.items());
        for failure in &summary.failures {
            banner::sub_item(&format!(
                "{} {}: {}",
                failure.source,
                failure.external_id.as_deref().unwrap_or("(source)"),
                failure.message
            ));
        }
        Ok(summary)
    }

    async fn run_source(&self, source: &SourceConfig, mode: RunMode, summary: &mut RunSummary) {
        let posts = match self.source.fetch_posts(source).await {
            Ok(posts) => posts,
            Err(e) => {
                log::error!("[{}] fetch failed: {}", source.key, e);
                summary.fail(&source.key, None, &e);
                return;
            }
        };
        log::info!("[{}] {} posts fetched", source.key, posts.len());

        let recent = match self
            .repo
            .recent_fingerprints(&source.key, self.config.pipeline.recent_limit)
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                log::warn!("[{}] recent fingerprints unavailable: {}", source.key, e);
                HashMap::new()
            }
        };

        let delay = Duration::from_millis(self.config.pipeline.post_delay_ms);
        for post in oldest_first(posts) {
            if self.stopping() {
                log::info!("Shutdown requested; stopping before {}", post.url);
                summary.interrupted = true;
                return;
            }
            summary.fetched += 1;

            let external_id = post.external_id.clone();
            match self.process_post(post, &recent, mode).await {
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Ok(Outcome::Seeded) => summary.seeded += 1,
                Ok(Outcome::Unchanged) => summary.unchanged += 1,
                Ok(Outcome::Refreshed) => summary.refreshed += 1,
                Ok(Outcome::Delivered {
                    classification,
                    delivered,
                }) => {
                    match classification {
                        Classification::New => summary.new += 1,
                        _ => summary.modified += 1,
                    }
                    if delivered > 0 {
                        summary.notified += 1;
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                Ok(Outcome::Retried { delivered }) => {
                    summary.retried += 1;
                    if delivered > 0 && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    log::error!("[{}] {} failed: {}", source.key, external_id, e);
                    summary.fail(&source.key, Some(&external_id), &e);
                }
            }
        }
    }

    async fn process_post(
        &self,
        mut post: Post,
        recent: &HashMap<String, String>,
        mode: RunMode,
    ) -> Result<Outcome> {
        let min_body = self.config.pipeline.min_body_length;
        if post.body.trim().chars().count() < min_body && !post.has_media() {
            log::debug!("Skipping {} (no content)", post.url);
            return Ok(Outcome::Skipped);
        }

        if mode == RunMode::Seed {
            post.content_fingerprint = Some(fingerprint(&post));
            self.repo.upsert_post(&post).await?;
            return Ok(Outcome::Seeded);
        }

        let stored = self
            .repo
            .last_known_post(&post.source_key, &post.external_id)
            .await?;
        let previous = stored.as_ref().map(|s| &s.post);

        let owed = self.owed_platforms(stored.as_ref());

        let mut classification = ChangeClassifier::new(self.probe.as_ref())
            .classify(&post, previous)
            .await;
        if classification == Classification::Unchanged && owed.is_empty() {
            return Ok(Outcome::Unchanged);
        }

        if let Some(processor) = &self.attachments {
            processor.process(&mut post).await;
        }

        let current = fingerprint(&post);
        if classification == Classification::Modified {
            let known = recent
                .get(&post.external_id)
                .or_else(|| previous.and_then(|p| p.content_fingerprint.as_ref()));
            if known == Some(&current) {
                log::debug!("{} matches its stored fingerprint", post.url);
                classification = Classification::Unchanged;
            }
        }
        if classification == Classification::Unchanged {
            return match &stored {
                Some(stored) if !owed.is_empty() => self.redeliver(post, stored, &owed).await,
                _ => Ok(Outcome::Unchanged),
            };
        }
        post.content_fingerprint = Some(current);

        self.analyze(&mut post, previous).await;

        let changes = match previous {
            Some(previous) => {
                let builder = ChangeSetBuilder::new(
                    self.summarizer.as_deref(),
                    self.config.labels.content_placeholder.clone(),
                );
                let changes = builder.build(&post, previous).await;
                if changes.is_empty() {
                    log::debug!("{} changed without reportable differences", post.url);
                    self.repo.upsert_post(&post).await?;
                    return Ok(Outcome::Refreshed);
                }
                Some(changes)
            }
            None => None,
        };

        let delivery = self
            .deliver(&post, classification, changes.as_ref(), stored.as_ref(), None)
            .await?;
        let id = self.repo.upsert_post(&post).await?;
        self.commit(&id, &delivery).await?;

        Ok(Outcome::Delivered {
            classification,
            delivered: delivery.records.len(),
        })
    }

    /// Pending platforms of a stored post that are still routed its source.
    fn owed_platforms(&self, stored: Option<&StoredPost>) -> Vec<Platform> {
        let Some(stored) = stored else {
            return Vec::new();
        };
        stored
            .pending
            .iter()
            .copied()
            .filter(|platform| {
                self.channels
                    .iter()
                    .any(|c| c.platform() == *platform && c.handles(&stored.post.source_key))
            })
            .collect()
    }

    /// Send an unchanged post as new to the platforms that missed it.
    async fn redeliver(
        &self,
        mut post: Post,
        stored: &StoredPost,
        owed: &[Platform],
    ) -> Result<Outcome> {
        log::info!(
            "Retrying {} on {}",
            post.url,
            owed.iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        post.inherit_analysis(&stored.post);
        post.content_fingerprint = stored.post.content_fingerprint.clone();

        let delivery = self
            .deliver(&post, Classification::New, None, None, Some(owed))
            .await?;
        self.commit(&stored.id, &delivery).await?;
        Ok(Outcome::Retried {
            delivered: delivery.records.len(),
        })
    }

    async fn commit(&self, id: &RecordId, delivery: &Delivery) -> Result<()> {
        for record in &delivery.records {
            self.repo.set_delivery_record(id, record).await?;
        }
        self.repo.set_pending(id, &delivery.failed).await
    }

    /// Reuse the previous analysis when the body is unchanged, otherwise ask the analyzer.
    async fn analyze(&self, post: &mut Post, previous: Option<&Post>) {
        if let Some(previous) = previous
            && previous.body.trim() == post.body.trim()
        {
            post.inherit_analysis(previous);
            return;
        }

        let Some(analyzer) = &self.analyzer else {
            return;
        };
        match analyzer.analyze(post).await {
            Ok(analysis) => post.apply_analysis(analysis),
            Err(e) => log::warn!("Analysis unavailable for {}: {}", post.url, e),
        }
    }

    /// Send to every applicable platform, or only to `only`. Fails only if
    /// all targeted platforms failed.
    async fn deliver(
        &self,
        post: &Post,
        classification: Classification,
        changes: Option<&ChangeSet>,
        stored: Option<&StoredPost>,
        only: Option<&[Platform]>,
    ) -> Result<Delivery> {
        let mut delivery = Delivery::default();
        let mut last_error = None;

        for channel in self.channels.iter().filter(|c| {
            c.handles(&post.source_key) && only.is_none_or(|only| only.contains(&c.platform()))
        }) {
            let dispatch = Dispatch {
                post,
                classification,
                changes,
                prior: stored.and_then(|s| s.record_for(channel.platform())),
            };
            match channel.dispatch(&dispatch).await {
                Ok(record) => delivery.records.push(record),
                Err(e) => {
                    log::warn!(
                        "[{}] delivery of {} failed: {}",
                        channel.platform(),
                        post.url,
                        e
                    );
                    delivery.failed.push(channel.platform());
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivery.records.is_empty() => Err(e),
            _ => Ok(delivery),
        }
    }
}

/// Oldest first: by publish time when every post has one, otherwise the
/// reverse of the newest-first listing.
fn oldest_first(mut posts: Vec<Post>) -> Vec<Post> {
    if posts.iter().all(|p| p.published_at.is_some()) {
        posts.sort_by_key(|p| p.published_at);
    } else {
        posts.reverse();
    }
    posts
}
