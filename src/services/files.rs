//! Preview rendering fallback.

use async_trait::async_trait;

use super::FileProcessor;
use crate::error::Result;

/// Renders nothing. Used when no document converter is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreviews;

#[async_trait]
impl FileProcessor for NoPreviews {
    async fn extract_previews(&self, _bytes: &[u8], name: &str) -> Result<Vec<Vec<u8>>> {
        log::debug!("No preview renderer for {}", name);
        Ok(Vec::new())
    }
}
