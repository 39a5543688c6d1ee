//! Pure reducers from store snapshots to summaries
//!
//! No clocks, no I/O, no shared state: the same snapshot always produces
//! the same summary. Every reducer folds left to right over the snapshot
//! (oldest record first).

use super::store::Snapshot;
use super::summary::{
    ActivityStats, AggregateSummary, CategoryTotals, InventorySummary, Interval,
    PerformanceSummary, SalesSummary, ServiceAverages, SocialEngagement, TimeSeriesPoint,
    UserActivitySummary, ViewSummary,
};
use super::types::{
    Category, InventoryRecord, PerformanceRecord, SalesRecord, SocialRecord, SummaryView,
    Timestamped, UserActivityRecord,
};
use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Product category used when a line item has none
pub const UNCATEGORIZED: &str = "uncategorized";

/// Action type counted as an impression in engagement ratios
pub const IMPRESSION_ACTION: &str = "impression";

/// Snapshot of one category store, tagged with its category
#[derive(Debug, Clone)]
pub enum CategorySnapshot {
    Sales(Snapshot<SalesRecord>),
    Inventory(Snapshot<InventoryRecord>),
    Performance(Snapshot<PerformanceRecord>),
    UserActivity(Snapshot<UserActivityRecord>),
    Social(Snapshot<SocialRecord>),
}

impl CategorySnapshot {
    pub fn category(&self) -> Category {
        match self {
            CategorySnapshot::Sales(_) => Category::Sales,
            CategorySnapshot::Inventory(_) => Category::Inventory,
            CategorySnapshot::Performance(_) => Category::Performance,
            CategorySnapshot::UserActivity(_) => Category::UserActivity,
            CategorySnapshot::Social(_) => Category::Social,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CategorySnapshot::Sales(s) => s.len(),
            CategorySnapshot::Inventory(s) => s.len(),
            CategorySnapshot::Performance(s) => s.len(),
            CategorySnapshot::UserActivity(s) => s.len(),
            CategorySnapshot::Social(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reduce a snapshot into its full category summary
pub fn compute_summary(snapshot: &CategorySnapshot) -> AggregateSummary {
    match snapshot {
        CategorySnapshot::Sales(records) => AggregateSummary::Sales(SalesSummary {
            daily_totals: daily_sales(records),
            by_category: sales_by_category(records),
        }),
        CategorySnapshot::Inventory(records) => AggregateSummary::Inventory(InventorySummary {
            by_product: inventory_by_product(records),
            by_location: inventory_by_location(records),
        }),
        CategorySnapshot::Performance(records) => {
            AggregateSummary::Performance(PerformanceSummary {
                by_service: performance_by_service(records),
            })
        }
        CategorySnapshot::UserActivity(records) => {
            AggregateSummary::UserActivity(UserActivitySummary {
                by_type: user_activity_by_type(records),
            })
        }
        CategorySnapshot::Social(records) => AggregateSummary::Social(social_engagement(records)),
    }
}

/// Reduce a snapshot into one cached view
///
/// Fails only when the snapshot belongs to a different category than the
/// view.
pub fn compute_view(view: SummaryView, snapshot: &CategorySnapshot) -> Result<ViewSummary> {
    let summary = match (view, snapshot) {
        (SummaryView::SalesDaily, CategorySnapshot::Sales(r)) => {
            ViewSummary::SalesDaily(daily_sales(r))
        }
        (SummaryView::SalesByCategory, CategorySnapshot::Sales(r)) => {
            ViewSummary::SalesByCategory(sales_by_category(r))
        }
        (SummaryView::InventoryByProduct, CategorySnapshot::Inventory(r)) => {
            ViewSummary::InventoryByProduct(inventory_by_product(r))
        }
        (SummaryView::InventoryByLocation, CategorySnapshot::Inventory(r)) => {
            ViewSummary::InventoryByLocation(inventory_by_location(r))
        }
        (SummaryView::PerformanceByService, CategorySnapshot::Performance(r)) => {
            ViewSummary::PerformanceByService(performance_by_service(r))
        }
        (SummaryView::UserActivityByType, CategorySnapshot::UserActivity(r)) => {
            ViewSummary::UserActivityByType(user_activity_by_type(r))
        }
        (SummaryView::SocialEngagement, CategorySnapshot::Social(r)) => {
            ViewSummary::SocialEngagement(social_engagement(r))
        }
        (view, snapshot) => {
            return Err(AnalyticsError::Compute {
                view: view.key().to_string(),
                reason: format!("given a {} snapshot", snapshot.category()),
            })
        }
    };
    Ok(summary)
}

/// Order amount summed per UTC calendar day
pub fn daily_sales(records: &[Arc<SalesRecord>]) -> BTreeMap<String, f64> {
    let mut daily = BTreeMap::new();
    for sale in records {
        let day = sale.timestamp.format("%Y-%m-%d").to_string();
        *daily.entry(day).or_insert(0.0) += sale.amount;
    }
    daily
}

/// Units and revenue per product category
///
/// Quantity defaults to 1 when absent or zero, price to 0. Unit counts
/// saturate at `u64::MAX`.
pub fn sales_by_category(records: &[Arc<SalesRecord>]) -> BTreeMap<String, CategoryTotals> {
    let mut by_category: BTreeMap<String, CategoryTotals> = BTreeMap::new();
    for sale in records {
        for product in &sale.products {
            let category = product
                .category
                .clone()
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            let quantity = product.quantity.filter(|q| *q > 0).unwrap_or(1);
            let price = product.price.unwrap_or(0.0);

            let totals = by_category.entry(category).or_default();
            totals.count = totals.count.saturating_add(quantity);
            totals.revenue += price * quantity as f64;
        }
    }
    by_category
}

/// Last write wins per product
pub fn inventory_by_product(records: &[Arc<InventoryRecord>]) -> BTreeMap<String, i64> {
    let mut by_product = BTreeMap::new();
    for update in records {
        by_product.insert(update.product_id.clone(), update.quantity);
    }
    by_product
}

/// Last write wins per (location, product); records without a location are skipped
pub fn inventory_by_location(
    records: &[Arc<InventoryRecord>],
) -> BTreeMap<String, BTreeMap<String, i64>> {
    let mut by_location: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
    for update in records {
        let Some(location) = &update.location else {
            continue;
        };
        by_location
            .entry(location.clone())
            .or_default()
            .insert(update.product_id.clone(), update.quantity);
    }
    by_location
}

/// Mean latency, error rate and throughput per service (`sum / count`)
pub fn performance_by_service(
    records: &[Arc<PerformanceRecord>],
) -> BTreeMap<String, ServiceAverages> {
    #[derive(Default)]
    struct Sums {
        count: u64,
        latency: f64,
        error_rate: f64,
        throughput: f64,
    }

    let mut sums: BTreeMap<&str, Sums> = BTreeMap::new();
    for sample in records {
        let s = sums.entry(sample.service.as_str()).or_default();
        s.count += 1;
        s.latency += sample.latency;
        s.error_rate += sample.error_rate;
        s.throughput += sample.throughput;
    }

    sums.into_iter()
        .map(|(service, s)| {
            let n = s.count as f64;
            (
                service.to_string(),
                ServiceAverages {
                    avg_latency: s.latency / n,
                    avg_error_rate: s.error_rate / n,
                    avg_throughput: s.throughput / n,
                },
            )
        })
        .collect()
}

/// Count and incrementally updated mean duration per action type
///
/// Uses `mean_n = (mean_{n-1} * (n - 1) + x_n) / n` in snapshot order,
/// so results match a single left-to-right pass bit for bit.
pub fn user_activity_by_type(
    records: &[Arc<UserActivityRecord>],
) -> BTreeMap<String, ActivityStats> {
    let mut by_type: BTreeMap<String, ActivityStats> = BTreeMap::new();
    for activity in records {
        let stats = by_type.entry(activity.action.clone()).or_default();
        stats.count += 1;
        let n = stats.count as f64;
        stats.avg_duration = ((stats.avg_duration * (n - 1.0)) + activity.duration) / n;
    }
    by_type
}

/// Action counts plus the non-impression to impression ratio
pub fn social_engagement(records: &[Arc<SocialRecord>]) -> SocialEngagement {
    let mut engagement = SocialEngagement::default();
    for social in records {
        *engagement.by_type.entry(social.action.clone()).or_insert(0) += 1;
        engagement.total_engagements += 1;
    }

    let impressions = engagement
        .by_type
        .get(IMPRESSION_ACTION)
        .copied()
        .unwrap_or(0);
    if impressions > 0 {
        let engagements = engagement.total_engagements - impressions;
        engagement.average_engagement_rate = engagements as f64 / impressions as f64;
    }
    engagement
}

/// Bucket label for a timestamp at the given interval
pub fn bucket_label(timestamp: DateTime<Utc>, interval: Interval) -> String {
    match interval {
        Interval::Hour => format!("{}:00:00Z", timestamp.format("%Y-%m-%dT%H")),
        Interval::Day => timestamp.format("%Y-%m-%d").to_string(),
        Interval::Week => {
            let days_from_monday = timestamp.weekday().num_days_from_monday() as i64;
            let monday = timestamp.date_naive() - Duration::days(days_from_monday);
            monday.format("%Y-%m-%d").to_string()
        }
        Interval::Month => format!("{:04}-{:02}", timestamp.year(), timestamp.month()),
    }
}

/// Group records inside `[start, end]` into time buckets
///
/// Points come back sorted by bucket; each carries the serialized records
/// that fell into it, in snapshot order.
pub fn time_series<T>(
    records: &[Arc<T>],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
) -> Result<Vec<TimeSeriesPoint>>
where
    T: Timestamped + Serialize,
{
    let mut buckets: BTreeMap<String, TimeSeriesPoint> = BTreeMap::new();
    for record in records {
        let ts = record.timestamp();
        if ts < start || ts > end {
            continue;
        }
        let data = serde_json::to_value(record.as_ref()).map_err(|err| AnalyticsError::Compute {
            view: format!("timeseries.{}", interval.as_str()),
            reason: format!("cannot serialize record at {}: {}", ts, err),
        })?;

        let label = bucket_label(ts, interval);
        let point = buckets
            .entry(label.clone())
            .or_insert_with(|| TimeSeriesPoint {
                bucket: label,
                count: 0,
                data: Vec::new(),
            });
        point.count += 1;
        point.data.push(data);
    }
    Ok(buckets.into_values().collect())
}

/// Time series over any category snapshot
pub fn snapshot_time_series(
    snapshot: &CategorySnapshot,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
) -> Result<Vec<TimeSeriesPoint>> {
    match snapshot {
        CategorySnapshot::Sales(r) => time_series(r, start, end, interval),
        CategorySnapshot::Inventory(r) => time_series(r, start, end, interval),
        CategorySnapshot::Performance(r) => time_series(r, start, end, interval),
        CategorySnapshot::UserActivity(r) => time_series(r, start, end, interval),
        CategorySnapshot::Social(r) => time_series(r, start, end, interval),
    }
}
