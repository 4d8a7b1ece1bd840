//! Relay Cache - a caching, deduplicating, rate-governed relay
//!
//! Sits in front of a quota-limited sports data API: answers from a memory
//! tier and a durable disk tier, collapses concurrent identical requests into
//! one upstream call, and paces what does go upstream.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod models;
pub mod service;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{FetchError, Result};
pub use fetch::{BatchRequest, CancelToken, FetchOutcome, FetchRequest, Source};
pub use service::{CacheService, ServiceStats};
