//! Post persistence.
//!
//! One JSON file per source holds every stored post of that source keyed by
//! external id, together with its delivery records.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! └── posts/
//!     ├── cse_notice.json
//!     └── dorm_notice.json
//! ```

pub mod local;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StoredPost;

pub use local::LocalStorage;

/// Contents of one source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// ISO 8601 timestamp of the last write
    pub updated_at: DateTime<Utc>,
    /// Stored posts by external id
    #[serde(default)]
    pub posts: BTreeMap<String, StoredPost>,
}

impl Default for SourceFile {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            posts: BTreeMap::new(),
        }
    }
}
