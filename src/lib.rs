// src/lib.rs

//! notice-relay: detects new and edited notices and relays them to chat platforms.

pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
