//! Event analytics pipeline
//!
//! Ingests domain events (orders, inventory changes, service metrics,
//! user actions, social engagements), keeps bounded per-category
//! histories in memory and serves cached aggregate summaries.

pub mod error;
pub mod pipeline;
pub mod source;

pub use error::{AnalyticsError, Result};
