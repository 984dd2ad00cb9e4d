//! HTTP adapter for the summarizer and analyzer, plus the per-run summary budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Analyzer, DiffSummary, Summarizer};
use crate::error::{AppError, Result};
use crate::models::{AiConfig, Analysis, Post};
use crate::notify::{ApiRequest, TransportPolicy};

#[derive(Debug, Deserialize)]
struct SummaryReply {
    summary: String,
}

/// Talks to an AI service exposing `/summarize` and `/analyze`.
pub struct HttpAiService {
    policy: TransportPolicy,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAiService {
    pub fn new(policy: TransportPolicy, config: &AiConfig) -> Self {
        Self {
            policy,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn request(&self, path: &str, body: serde_json::Value) -> ApiRequest {
        let request = ApiRequest::post_json(format!("{}/{}", self.endpoint, path), body);
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }
}

#[async_trait]
impl Summarizer for HttpAiService {
    async fn summarize_diff(&self, old: &str, new: &str) -> Result<DiffSummary> {
        let request = self.request("summarize", json!({ "old": old, "new": new }));
        let reply: SummaryReply = self
            .policy
            .execute("summarizer", &request)
            .await
            .and_then(|response| response.json())
            .map_err(|e| AppError::degraded("summarizer", e))?;
        Ok(DiffSummary::parse(&reply.summary))
    }
}

#[async_trait]
impl Analyzer for HttpAiService {
    async fn analyze(&self, post: &Post) -> Result<Analysis> {
        let request = self.request(
            "analyze",
            json!({
                "source_key": post.source_key,
                "title": post.title,
                "body": post.body,
            }),
        );
        self.policy
            .execute("analyzer", &request)
            .await
            .and_then(|response| response.json())
            .map_err(|e| AppError::degraded("analyzer", e))
    }
}

/// Caps summarizer calls per run.
#[derive(Debug)]
pub struct SummaryBudget {
    limit: usize,
    used: AtomicUsize,
}

impl SummaryBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Take one call from the budget. `false` once the limit is reached.
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    /// Start a new run.
    pub fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
    }
}

/// Summarizer that refuses to call through once the budget is spent.
pub struct BudgetedSummarizer {
    inner: Arc<dyn Summarizer>,
    budget: Arc<SummaryBudget>,
}

impl BudgetedSummarizer {
    pub fn new(inner: Arc<dyn Summarizer>, budget: Arc<SummaryBudget>) -> Self {
        Self { inner, budget }
    }
}

#[async_trait]
impl Summarizer for BudgetedSummarizer {
    async fn summarize_diff(&self, old: &str, new: &str) -> Result<DiffSummary> {
        if !self.budget.try_acquire() {
            return Err(AppError::degraded(
                "summarizer",
                format!("budget of {} calls per run exhausted", self.budget.limit),
            ));
        }
        self.inner.summarize_diff(old, new).await
    }
}
