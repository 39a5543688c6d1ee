//! # Event Aggregation Pipeline
//!
//! In-memory analytics over a stream of business events. Events arrive as
//! broker messages, are validated into typed per-category records, appended
//! to bounded stores, and summarised on demand through a TTL cache.
//!
//! ## Architecture
//!
//! 1. `ingestion` decodes and validates each message (bad ones are logged and dropped)
//! 2. `store` keeps the newest N records per category, FIFO eviction
//! 3. Every accepted event invalidates the cached views of its category
//! 4. `query` serves views cache-aside; misses reduce a store snapshot in `aggregator`
//! 5. Concurrent misses for one key share a single recomputation
//!
//! Nothing here is durable. A restart starts from empty stores.
//!
//! ## Module Organization
//!
//! - `types` - Categories, view keys, envelopes and typed records
//! - `validation` - Broker message decoding and per-category field checks
//! - `store` - Bounded append-only category store
//! - `summary` - Summary and time-series output types
//! - `aggregator` - Pure reducers from snapshots to summaries
//! - `cache` - TTL cache with single-flight recomputation
//! - `dedup` - Optional seen-id window
//! - `engine` - `AggregationService`, owner of stores and cache
//! - `ingestion` - Per-event pipeline and channel consumer loop
//! - `query` - Read facade for summaries, time series and health
//! - `config` - Environment-driven configuration

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod ingestion;
pub mod query;
pub mod store;
pub mod summary;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use cache::{CacheLayer, CacheStats};
pub use config::PipelineConfig;
pub use engine::{AggregationService, HealthReport, IngestStats};
pub use ingestion::{start_ingestion, IngestOutcome, IngestionPipeline};
pub use query::QueryFacade;
pub use summary::{AggregateSummary, Interval, TimeSeries, ViewSummary};
pub use types::{BrokerMessage, Category, EventEnvelope, SummaryView};
