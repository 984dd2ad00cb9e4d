//! HEAD-request freshness probe.

use std::time::Duration;

use async_trait::async_trait;

use super::{FreshnessProbe, ProbeResult};
use crate::error::AppError;
use crate::notify::{ApiRequest, TransportPolicy};

/// Probes attachment URLs with `HEAD` through the shared transport policy.
pub struct HttpProbe {
    policy: TransportPolicy,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(policy: TransportPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }
}

#[async_trait]
impl FreshnessProbe for HttpProbe {
    async fn head_probe(&self, url: &str, referer: &str) -> ProbeResult {
        let request = ApiRequest::head(url)
            .header("Referer", referer)
            .timeout(self.timeout);

        match self.policy.execute("head probe", &request).await {
            Ok(response) => ProbeResult {
                status: Some(response.status),
                content_length: response
                    .header("content-length")
                    .and_then(|v| v.trim().parse().ok()),
                etag: response.header("etag").map(|v| v.trim().to_string()),
            },
            // Non-2xx answers still count as a response
            Err(AppError::Status { status, .. }) => ProbeResult {
                status: Some(status),
                ..ProbeResult::failed()
            },
            Err(e) => {
                log::debug!("HEAD {} failed: {}", url, e);
                ProbeResult::failed()
            }
        }
    }
}
