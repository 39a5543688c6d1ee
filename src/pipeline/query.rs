//! Query facade - cache-aside reads over the aggregation service
//!
//! Reads never block on ingestion: a miss snapshots the store and reduces
//! it in-process. Summaries are computed fully before they are published to
//! the cache, so a caller never sees a half-built value.

use super::aggregator::{self, snapshot_time_series};
use super::engine::{AggregationService, HealthReport};
use super::summary::{AggregateSummary, Interval, TimeSeries, ViewSummary};
use super::types::{Category, SummaryView};
use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct QueryFacade {
    service: Arc<AggregationService>,
}

impl QueryFacade {
    pub fn new(service: Arc<AggregationService>) -> Self {
        Self { service }
    }

    /// Full summary for a category, assembled from its cached views
    ///
    /// Served from cache when every view of the category is live. On a miss
    /// all views are recomputed from one store snapshot (single-flight per
    /// category), so the summary always describes a single point in time.
    /// Fails with `Unavailable` only if the views cannot be computed and
    /// have no last-known-good values.
    pub async fn get_summary(&self, category: Category) -> Result<AggregateSummary> {
        let views = self.category_views(category).await?;
        AggregateSummary::from_views(category, &views)
    }

    /// One cached view
    pub async fn get_view(&self, view: SummaryView) -> Result<Arc<ViewSummary>> {
        self.category_views(view.category())
            .await?
            .into_iter()
            .find(|summary| summary.view() == view)
            .ok_or_else(|| AnalyticsError::Compute {
                view: view.key().to_string(),
                reason: "view missing from category results".to_string(),
            })
    }

    /// Every view of `category`, in `Category::views` order
    async fn category_views(&self, category: Category) -> Result<Vec<Arc<ViewSummary>>> {
        let views = category.views();
        let keys: Vec<&str> = views.iter().map(|view| view.key()).collect();
        let service = &self.service;
        self.service
            .cache()
            .get_or_compute_group(category.as_str(), &keys, service.ttl_for(category), || {
                let snapshot = service.snapshot(category);
                log::debug!("🔄 Recomputing {} views from {} records", category, snapshot.len());
                views
                    .iter()
                    .map(|view| aggregator::compute_view(*view, &snapshot))
                    .collect()
            })
            .await
    }

    /// Records of `category` within `[start, end]`, bucketed by `interval`
    ///
    /// Computed directly from a store snapshot; not cached.
    pub fn time_series(
        &self,
        category: Category,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<TimeSeries> {
        if start > end {
            return Err(AnalyticsError::InvalidField {
                category: category.to_string(),
                field: "start".to_string(),
                reason: "start must not be after end".to_string(),
            });
        }

        let snapshot = self.service.snapshot(category);
        Ok(TimeSeries {
            category,
            interval,
            start,
            end,
            points: snapshot_time_series(&snapshot, start, end, interval)?,
        })
    }

    pub fn health(&self) -> HealthReport {
        self.service.health()
    }
}
