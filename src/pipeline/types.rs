//! Core data types for the analytics pipeline
//!
//! `Category` is the closed set of event kinds. Every category maps to a
//! typed record, a store, and one or more cached summary views; adding a
//! category means extending the matches below, which the compiler checks.

use crate::error::AnalyticsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Event category (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Sales,
    Inventory,
    Performance,
    UserActivity,
    Social,
}

impl Category {
    pub fn all() -> [Category; 5] {
        [
            Category::Sales,
            Category::Inventory,
            Category::Performance,
            Category::UserActivity,
            Category::Social,
        ]
    }

    /// Canonical category name
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sales => "sales",
            Category::Inventory => "inventory",
            Category::Performance => "performance",
            Category::UserActivity => "userActivity",
            Category::Social => "social",
        }
    }

    /// Broker event type (also the topic name) carrying this category
    pub fn event_type(&self) -> &'static str {
        match self {
            Category::Sales => "order.placed",
            Category::Inventory => "inventory.updated",
            Category::Performance => "performance.metric",
            Category::UserActivity => "user.activity",
            Category::Social => "social.engagement",
        }
    }

    /// Suffix used by per-category environment overrides
    pub fn env_key(&self) -> &'static str {
        match self {
            Category::Sales => "SALES",
            Category::Inventory => "INVENTORY",
            Category::Performance => "PERFORMANCE",
            Category::UserActivity => "USER_ACTIVITY",
            Category::Social => "SOCIAL",
        }
    }

    /// Resolve an event type or canonical name
    pub fn from_event_type(s: &str) -> Option<Self> {
        Category::all()
            .into_iter()
            .find(|c| c.event_type() == s || c.as_str() == s)
    }

    /// Cached views derived from this category
    pub fn views(&self) -> &'static [SummaryView] {
        match self {
            Category::Sales => &[SummaryView::SalesDaily, SummaryView::SalesByCategory],
            Category::Inventory => &[
                SummaryView::InventoryByProduct,
                SummaryView::InventoryByLocation,
            ],
            Category::Performance => &[SummaryView::PerformanceByService],
            Category::UserActivity => &[SummaryView::UserActivityByType],
            Category::Social => &[SummaryView::SocialEngagement],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::from_event_type(s).ok_or_else(|| AnalyticsError::UnknownCategory(s.to_string()))
    }
}

/// One cached aggregate view; each view owns exactly one cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SummaryView {
    SalesDaily,
    SalesByCategory,
    InventoryByProduct,
    InventoryByLocation,
    PerformanceByService,
    UserActivityByType,
    SocialEngagement,
}

impl SummaryView {
    pub fn all() -> [SummaryView; 7] {
        [
            SummaryView::SalesDaily,
            SummaryView::SalesByCategory,
            SummaryView::InventoryByProduct,
            SummaryView::InventoryByLocation,
            SummaryView::PerformanceByService,
            SummaryView::UserActivityByType,
            SummaryView::SocialEngagement,
        ]
    }

    /// Cache key
    pub fn key(&self) -> &'static str {
        match self {
            SummaryView::SalesDaily => "sales.daily",
            SummaryView::SalesByCategory => "sales.byCategory",
            SummaryView::InventoryByProduct => "inventory.byProduct",
            SummaryView::InventoryByLocation => "inventory.byLocation",
            SummaryView::PerformanceByService => "performance.byService",
            SummaryView::UserActivityByType => "userActivity.byType",
            SummaryView::SocialEngagement => "social.engagement",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            SummaryView::SalesDaily | SummaryView::SalesByCategory => Category::Sales,
            SummaryView::InventoryByProduct | SummaryView::InventoryByLocation => {
                Category::Inventory
            }
            SummaryView::PerformanceByService => Category::Performance,
            SummaryView::UserActivityByType => Category::UserActivity,
            SummaryView::SocialEngagement => Category::Social,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        SummaryView::all().into_iter().find(|v| v.key() == key)
    }
}

impl fmt::Display for SummaryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Raw message as delivered by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    /// Topic the message arrived on, if the transport has one
    pub topic: Option<String>,
    /// JSON body
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(topic: Option<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }
}

/// Normalized inbound event
///
/// Built once per message by the ingestion pipeline and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Producer-assigned id, used only by the optional dedup window
    pub id: Option<String>,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
    pub payload: Map<String, Value>,
}

/// Records that can be bucketed on a time axis
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// One line item of an order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductLine {
    pub category: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesRecord {
    pub timestamp: DateTime<Utc>,
    pub order_id: String,
    pub user_id: Option<String>,
    pub amount: f64,
    pub products: Vec<ProductLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    pub timestamp: DateTime<Utc>,
    pub product_id: String,
    pub quantity: i64,
    pub location: Option<String>,
}

/// Service performance sample; absent metrics are stored as 0
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub latency: f64,
    pub error_rate: f64,
    pub throughput: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub action: String,
    pub duration: f64,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub action: String,
    pub content: Option<Value>,
    pub engagement: Option<Value>,
}

macro_rules! impl_timestamped {
    ($($record:ty),+) => {
        $(impl Timestamped for $record {
            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }
        })+
    };
}

impl_timestamped!(
    SalesRecord,
    InventoryRecord,
    PerformanceRecord,
    UserActivityRecord,
    SocialRecord
);

/// Validated record routed to its category store
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryRecord {
    Sales(SalesRecord),
    Inventory(InventoryRecord),
    Performance(PerformanceRecord),
    UserActivity(UserActivityRecord),
    Social(SocialRecord),
}

impl CategoryRecord {
    pub fn category(&self) -> Category {
        match self {
            CategoryRecord::Sales(_) => Category::Sales,
            CategoryRecord::Inventory(_) => Category::Inventory,
            CategoryRecord::Performance(_) => Category::Performance,
            CategoryRecord::UserActivity(_) => Category::UserActivity,
            CategoryRecord::Social(_) => Category::Social,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_resolution() {
        assert_eq!(Category::from_event_type("order.placed"), Some(Category::Sales));
        assert_eq!(Category::from_event_type("userActivity"), Some(Category::UserActivity));
        assert_eq!(Category::from_event_type("payment.refunded"), None);

        let err = "payment.refunded".parse::<Category>().unwrap_err();
        assert_eq!(err, AnalyticsError::UnknownCategory("payment.refunded".into()));
    }

    #[test]
    fn test_views_belong_to_their_category() {
        for category in Category::all() {
            for view in category.views() {
                assert_eq!(view.category(), category);
            }
        }
        // Every view is reachable from exactly one category
        let total: usize = Category::all().iter().map(|c| c.views().len()).sum();
        assert_eq!(total, SummaryView::all().len());
    }

    #[test]
    fn test_view_keys_round_trip() {
        assert_eq!(SummaryView::from_key("sales.byCategory"), Some(SummaryView::SalesByCategory));
        assert_eq!(SummaryView::from_key("social.engagement"), Some(SummaryView::SocialEngagement));
        assert_eq!(SummaryView::from_key("metrics:sales:daily"), None);
    }
}
