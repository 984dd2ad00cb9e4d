//! Change detection and the run loop.
//!
//! - `fingerprint`: content hash of a post's observable state
//! - `classify`: New / Modified / Unchanged verdicts
//! - `changeset`: field-level differences for Modified posts
//! - `diff`: line diffs and grapheme-safe chunking for detailed messages
//! - `relay`: orchestration of one run over all sources

pub mod changeset;
pub mod classify;
pub mod diff;
pub mod fingerprint;
pub mod relay;

pub use changeset::ChangeSetBuilder;
pub use classify::ChangeClassifier;
pub use fingerprint::fingerprint;
pub use relay::{PostFailure, Relay, RunMode, RunSummary};
