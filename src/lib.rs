// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod bot;
pub mod config;
pub mod error;
pub mod ingest;
pub mod links;
pub mod metrics;
pub mod notify;
pub mod store;
pub mod subscribers;
pub mod translate;

pub use crate::api::router;
pub use crate::ingest::{FailurePolicy, Pipeline};
pub use crate::ingest::types::{FeedItem, RunReport, TranslatedArticle};
