//! # footfall common library
//!
//! Shared code for the footfall ingestion engine:
//! - Error type
//! - TOML configuration with compiled defaults
//! - Timestamp and calendar helpers
//! - SQLite initialization
//! - Durable TTL cache

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use cache::{CacheNamespace, TtlCache};
pub use config::EngineConfig;
pub use error::{Error, Result};
