//! Aggregation service - owner of the category stores and the view cache
//!
//! One instance per process, shared by handle (`Arc`) between the
//! ingestion pipeline (the only writer) and the query facade (readers).
//! Tests build fresh instances; there is no global state.
//!
//! ## Data flow
//!
//! ```text
//! BrokerMessage
//!     ↓
//! IngestionPipeline::handle()  ── validate / dedup
//!     ↓
//! AggregationService::append()        (store tail)
//!     ↓
//! AggregationService::invalidate_category()   (every view key of the category)
//!     ↓
//! QueryFacade::get_summary()  ── cache miss → snapshot → aggregator → cache
//! ```

use super::aggregator::CategorySnapshot;
use super::cache::{CacheLayer, CacheStats};
use super::config::PipelineConfig;
use super::store::CategoryStore;
use super::summary::ViewSummary;
use super::types::{
    Category, CategoryRecord, InventoryRecord, PerformanceRecord, SalesRecord, SocialRecord,
    UserActivityRecord,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Ingestion counters since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
    pub duplicates: u64,
}

#[derive(Debug, Default)]
struct IngestCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    pub category: Category,
    pub len: usize,
    pub capacity: usize,
    pub evicted: u64,
}

/// Process health snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub stores: Vec<StoreHealth>,
    pub ingestion: IngestStats,
    pub cache: CacheStats,
}

pub struct AggregationService {
    sales: CategoryStore<SalesRecord>,
    inventory: CategoryStore<InventoryRecord>,
    performance: CategoryStore<PerformanceRecord>,
    user_activity: CategoryStore<UserActivityRecord>,
    social: CategoryStore<SocialRecord>,
    cache: CacheLayer<ViewSummary>,
    ttls: HashMap<Category, Duration>,
    counters: IngestCounters,
}

impl AggregationService {
    /// Create a service with empty stores, using system time for cache expiry
    pub fn new(config: &PipelineConfig) -> Self {
        Self::new_with_clock(config, Box::new(Utc::now))
    }

    /// Create a service with a custom cache clock
    ///
    /// Used for testing with deterministic expiry.
    pub fn new_with_clock(
        config: &PipelineConfig,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        let cap = config.store_capacity;
        Self {
            sales: CategoryStore::new(Category::Sales, cap),
            inventory: CategoryStore::new(Category::Inventory, cap),
            performance: CategoryStore::new(Category::Performance, cap),
            user_activity: CategoryStore::new(Category::UserActivity, cap),
            social: CategoryStore::new(Category::Social, cap),
            cache: CacheLayer::new_with_clock(config.default_ttl(), now_fn),
            ttls: Category::all()
                .into_iter()
                .map(|c| (c, config.ttl_for(c)))
                .collect(),
            counters: IngestCounters::default(),
        }
    }

    /// Append a validated record to its category store
    ///
    /// Returns the category written and the number of records evicted.
    pub(crate) fn append(&self, record: CategoryRecord) -> (Category, usize) {
        let category = record.category();
        let evicted = match record {
            CategoryRecord::Sales(r) => self.sales.append(r),
            CategoryRecord::Inventory(r) => self.inventory.append(r),
            CategoryRecord::Performance(r) => self.performance.append(r),
            CategoryRecord::UserActivity(r) => self.user_activity.append(r),
            CategoryRecord::Social(r) => self.social.append(r),
        };
        (category, evicted)
    }

    /// Invalidate every cached view derived from `category`
    ///
    /// All keys go stale in one step, so no reader sees one view of the
    /// category invalidated and another still live.
    pub fn invalidate_category(&self, category: Category) {
        let keys: Vec<&str> = category.views().iter().map(|view| view.key()).collect();
        self.cache.invalidate_all(&keys);
    }

    /// Point-in-time snapshot of one category store
    pub fn snapshot(&self, category: Category) -> CategorySnapshot {
        match category {
            Category::Sales => CategorySnapshot::Sales(self.sales.snapshot()),
            Category::Inventory => CategorySnapshot::Inventory(self.inventory.snapshot()),
            Category::Performance => CategorySnapshot::Performance(self.performance.snapshot()),
            Category::UserActivity => CategorySnapshot::UserActivity(self.user_activity.snapshot()),
            Category::Social => CategorySnapshot::Social(self.social.snapshot()),
        }
    }

    pub fn cache(&self) -> &CacheLayer<ViewSummary> {
        &self.cache
    }

    pub fn ttl_for(&self, category: Category) -> Duration {
        self.ttls
            .get(&category)
            .copied()
            .unwrap_or_else(|| self.cache.default_ttl())
    }

    pub fn store_health(&self, category: Category) -> StoreHealth {
        let (len, capacity, evicted) = match category {
            Category::Sales => store_stats(&self.sales),
            Category::Inventory => store_stats(&self.inventory),
            Category::Performance => store_stats(&self.performance),
            Category::UserActivity => store_stats(&self.user_activity),
            Category::Social => store_stats(&self.social),
        };
        StoreHealth {
            category,
            len,
            capacity,
            evicted,
        }
    }

    pub(crate) fn record_accepted(&self) {
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ingest_stats(&self) -> IngestStats {
        IngestStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "UP",
            version: env!("CARGO_PKG_VERSION"),
            stores: Category::all()
                .into_iter()
                .map(|c| self.store_health(c))
                .collect(),
            ingestion: self.ingest_stats(),
            cache: self.cache.stats(),
        }
    }
}

fn store_stats<T>(store: &CategoryStore<T>) -> (usize, usize, u64) {
    (store.len(), store.capacity(), store.evicted_total())
}
