// src/models/mod.rs

//! Domain models for the relay.
//!
//! Posts as fetched and stored, the verdicts and change sets derived from
//! them, per-platform delivery records, and configuration.

mod change;
mod config;
mod delivery;
mod post;

// Re-export all public types
pub use change::{ChangeSet, Classification};
pub use config::{
    AiConfig, AttachmentConfig, Config, DiscordConfig, HttpConfig, Labels, LoggingConfig,
    PipelineConfig, SourceConfig, StorageConfig, TelegramConfig, TransportConfig,
};
pub use delivery::{DeliveryRecord, Platform, RecordId, StoredPost};
pub use post::{Analysis, Attachment, Post};
