//! Aggregate summary structures
//!
//! Summaries are derived values: rebuilt wholesale from a store snapshot,
//! never patched in place. Maps are `BTreeMap` so serialized output is
//! stable across recomputations.

use super::types::{Category, SummaryView};
use crate::error::{AnalyticsError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Units sold and revenue for one product category
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryTotals {
    pub count: u64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAverages {
    pub avg_latency: f64,
    pub avg_error_rate: f64,
    pub avg_throughput: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub count: u64,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialEngagement {
    pub by_type: BTreeMap<String, u64>,
    pub total_engagements: u64,
    pub average_engagement_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    /// `YYYY-MM-DD` (UTC) -> summed order amount
    pub daily_totals: BTreeMap<String, f64>,
    pub by_category: BTreeMap<String, CategoryTotals>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub by_product: BTreeMap<String, i64>,
    /// location -> productId -> quantity
    pub by_location: BTreeMap<String, BTreeMap<String, i64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub by_service: BTreeMap<String, ServiceAverages>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivitySummary {
    pub by_type: BTreeMap<String, ActivityStats>,
}

/// Value stored under one cache key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ViewSummary {
    SalesDaily(BTreeMap<String, f64>),
    SalesByCategory(BTreeMap<String, CategoryTotals>),
    InventoryByProduct(BTreeMap<String, i64>),
    InventoryByLocation(BTreeMap<String, BTreeMap<String, i64>>),
    PerformanceByService(BTreeMap<String, ServiceAverages>),
    UserActivityByType(BTreeMap<String, ActivityStats>),
    SocialEngagement(SocialEngagement),
}

impl ViewSummary {
    pub fn view(&self) -> SummaryView {
        match self {
            ViewSummary::SalesDaily(_) => SummaryView::SalesDaily,
            ViewSummary::SalesByCategory(_) => SummaryView::SalesByCategory,
            ViewSummary::InventoryByProduct(_) => SummaryView::InventoryByProduct,
            ViewSummary::InventoryByLocation(_) => SummaryView::InventoryByLocation,
            ViewSummary::PerformanceByService(_) => SummaryView::PerformanceByService,
            ViewSummary::UserActivityByType(_) => SummaryView::UserActivityByType,
            ViewSummary::SocialEngagement(_) => SummaryView::SocialEngagement,
        }
    }
}

/// Full per-category summary served to the query layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum AggregateSummary {
    Sales(SalesSummary),
    Inventory(InventorySummary),
    Performance(PerformanceSummary),
    UserActivity(UserActivitySummary),
    Social(SocialEngagement),
}

impl AggregateSummary {
    pub fn category(&self) -> Category {
        match self {
            AggregateSummary::Sales(_) => Category::Sales,
            AggregateSummary::Inventory(_) => Category::Inventory,
            AggregateSummary::Performance(_) => Category::Performance,
            AggregateSummary::UserActivity(_) => Category::UserActivity,
            AggregateSummary::Social(_) => Category::Social,
        }
    }

    /// Assemble a category summary from its cached views
    ///
    /// Views may be given in any order; a missing or foreign view is a
    /// compute error.
    pub fn from_views(category: Category, views: &[Arc<ViewSummary>]) -> Result<Self> {
        let find = |wanted: SummaryView| {
            views
                .iter()
                .find(|v| v.view() == wanted)
                .map(|v| v.as_ref())
                .ok_or_else(|| AnalyticsError::Compute {
                    view: wanted.key().to_string(),
                    reason: format!("view missing while assembling {} summary", category),
                })
        };

        let summary = match category {
            Category::Sales => {
                let (ViewSummary::SalesDaily(daily), ViewSummary::SalesByCategory(by_category)) =
                    (find(SummaryView::SalesDaily)?, find(SummaryView::SalesByCategory)?)
                else {
                    return Err(mismatch(category));
                };
                AggregateSummary::Sales(SalesSummary {
                    daily_totals: daily.clone(),
                    by_category: by_category.clone(),
                })
            }
            Category::Inventory => {
                let (
                    ViewSummary::InventoryByProduct(by_product),
                    ViewSummary::InventoryByLocation(by_location),
                ) = (
                    find(SummaryView::InventoryByProduct)?,
                    find(SummaryView::InventoryByLocation)?,
                )
                else {
                    return Err(mismatch(category));
                };
                AggregateSummary::Inventory(InventorySummary {
                    by_product: by_product.clone(),
                    by_location: by_location.clone(),
                })
            }
            Category::Performance => {
                let ViewSummary::PerformanceByService(by_service) =
                    find(SummaryView::PerformanceByService)?
                else {
                    return Err(mismatch(category));
                };
                AggregateSummary::Performance(PerformanceSummary {
                    by_service: by_service.clone(),
                })
            }
            Category::UserActivity => {
                let ViewSummary::UserActivityByType(by_type) =
                    find(SummaryView::UserActivityByType)?
                else {
                    return Err(mismatch(category));
                };
                AggregateSummary::UserActivity(UserActivitySummary {
                    by_type: by_type.clone(),
                })
            }
            Category::Social => {
                let ViewSummary::SocialEngagement(engagement) =
                    find(SummaryView::SocialEngagement)?
                else {
                    return Err(mismatch(category));
                };
                AggregateSummary::Social(engagement.clone())
            }
        };

        Ok(summary)
    }
}

fn mismatch(category: Category) -> AnalyticsError {
    AnalyticsError::Compute {
        view: category.to_string(),
        reason: "view payload does not match its key".to_string(),
    }
}

/// Time-series bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Hour,
    Day,
    Week,
    Month,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hour" => Ok(Interval::Hour),
            "day" => Ok(Interval::Day),
            "week" => Ok(Interval::Week),
            "month" => Ok(Interval::Month),
            other => Err(AnalyticsError::InvalidField {
                category: "timeseries".to_string(),
                field: "interval".to_string(),
                reason: format!("unsupported interval `{}` (hour, day, week, month)", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub bucket: String,
    pub count: u64,
    pub data: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub category: Category,
    pub interval: Interval,
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    pub points: Vec<TimeSeriesPoint>,
}
