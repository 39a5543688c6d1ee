//! Pipeline configuration from environment variables

use super::types::Category;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the analytics pipeline and its runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Maximum records kept per category store
    pub store_capacity: usize,

    /// TTL applied to every cached view unless overridden
    pub default_ttl_secs: u64,

    /// Per-category TTL overrides
    pub ttl_overrides: HashMap<Category, u64>,

    /// Channel buffer size for broker -> ingestion (messages)
    pub channel_buffer: usize,

    /// Ingestion throughput log interval in milliseconds
    pub stats_interval_ms: u64,

    /// Size of the seen-ID dedup window (0 disables dedup)
    pub dedup_window: usize,

    /// JSONL event feed tailed by the runtime
    pub events_path: String,

    /// Replay the feed from its first line instead of the end
    pub from_beginning: bool,

    /// Summary report interval in milliseconds
    pub report_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_capacity: 10_000,
            default_ttl_secs: 3_600,
            ttl_overrides: HashMap::new(),
            channel_buffer: 10_000,
            stats_interval_ms: 10_000,
            dedup_window: 0,
            events_path: "events.jsonl".to_string(),
            from_beginning: false,
            report_interval_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ANALYTICS_STORE_CAPACITY` (default: 10000)
    /// - `ANALYTICS_CACHE_TTL_SECS` (default: 3600)
    /// - `ANALYTICS_TTL_<CATEGORY>_SECS` (optional, e.g. `ANALYTICS_TTL_SALES_SECS`)
    /// - `ANALYTICS_CHANNEL_BUFFER` (default: 10000)
    /// - `ANALYTICS_STATS_INTERVAL_MS` (default: 10000)
    /// - `ANALYTICS_DEDUP_WINDOW` (default: 0, disabled)
    /// - `ANALYTICS_EVENTS_PATH` (default: events.jsonl)
    /// - `ANALYTICS_FROM_BEGINNING` (default: false)
    /// - `ANALYTICS_REPORT_INTERVAL_MS` (default: 30000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unparseable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let ttl_overrides = Category::all()
            .into_iter()
            .filter_map(|category| {
                let key = format!("ANALYTICS_TTL_{}_SECS", category.env_key());
                parse_var(&lookup, &key).map(|secs: u64| (category, secs))
            })
            .collect();

        Self {
            store_capacity: parse_var(&lookup, "ANALYTICS_STORE_CAPACITY")
                .unwrap_or(defaults.store_capacity),
            default_ttl_secs: parse_var(&lookup, "ANALYTICS_CACHE_TTL_SECS")
                .unwrap_or(defaults.default_ttl_secs),
            ttl_overrides,
            channel_buffer: parse_var(&lookup, "ANALYTICS_CHANNEL_BUFFER")
                .unwrap_or(defaults.channel_buffer),
            stats_interval_ms: parse_var(&lookup, "ANALYTICS_STATS_INTERVAL_MS")
                .unwrap_or(defaults.stats_interval_ms),
            dedup_window: parse_var(&lookup, "ANALYTICS_DEDUP_WINDOW")
                .unwrap_or(defaults.dedup_window),
            events_path: lookup("ANALYTICS_EVENTS_PATH").unwrap_or(defaults.events_path),
            from_beginning: parse_var(&lookup, "ANALYTICS_FROM_BEGINNING")
                .unwrap_or(defaults.from_beginning),
            report_interval_ms: parse_var(&lookup, "ANALYTICS_REPORT_INTERVAL_MS")
                .unwrap_or(defaults.report_interval_ms),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// TTL for every view of `category`
    pub fn ttl_for(&self, category: Category) -> Duration {
        let secs = self
            .ttl_overrides
            .get(&category)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}
