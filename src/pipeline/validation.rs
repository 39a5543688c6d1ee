//! Broker message decoding and per-category payload validation
//!
//! Two steps, both pure:
//! 1. `decode_message` turns raw bytes into an `EventEnvelope`
//!    (resolving the category from the body `type` or the topic)
//! 2. `validate` checks the payload shape for that category and produces
//!    the typed record stored downstream

use super::types::{
    BrokerMessage, Category, CategoryRecord, EventEnvelope, InventoryRecord, PerformanceRecord,
    ProductLine, SalesRecord, SocialRecord, UserActivityRecord,
};
use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Decode a broker message into an envelope
///
/// `now` stamps events that carry no timestamp of their own.
pub fn decode_message(message: &BrokerMessage, now: DateTime<Utc>) -> Result<EventEnvelope> {
    let body: Value = serde_json::from_slice(&message.payload)
        .map_err(|e| AnalyticsError::MalformedMessage(format!("invalid JSON: {}", e)))?;

    let Value::Object(mut body) = body else {
        return Err(AnalyticsError::MalformedMessage(
            "message body is not a JSON object".to_string(),
        ));
    };

    let event_type = match body.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Null) | None => message.topic.clone().ok_or_else(|| {
            AnalyticsError::MalformedMessage("no event type in body or topic".to_string())
        })?,
        Some(other) => {
            return Err(AnalyticsError::MalformedMessage(format!(
                "event type must be a string, got {}",
                other
            )))
        }
    };
    let category: Category = event_type.parse()?;

    let timestamp = match body.get("timestamp") {
        None | Some(Value::Null) => now,
        Some(value) => parse_timestamp(category, value)?,
    };

    let id = match body.get("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(_) => return Err(invalid(category, "id", "expected string or number")),
    };

    let payload = match body.remove("data") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(data)) => data,
        Some(_) => return Err(invalid(category, "data", "expected object")),
    };

    Ok(EventEnvelope {
        id,
        category,
        timestamp,
        payload,
    })
}

/// Validate an envelope's payload and build the typed record
pub fn validate(envelope: &EventEnvelope) -> Result<CategoryRecord> {
    let fields = Fields {
        category: envelope.category,
        payload: &envelope.payload,
    };
    let timestamp = envelope.timestamp;

    let record = match envelope.category {
        Category::Sales => CategoryRecord::Sales(SalesRecord {
            timestamp,
            order_id: fields.required_id("orderId")?,
            user_id: fields.optional_id("userId")?,
            amount: fields.optional_f64("amount")?.unwrap_or(0.0),
            products: fields.products()?,
        }),
        Category::Inventory => CategoryRecord::Inventory(InventoryRecord {
            timestamp,
            product_id: fields.required_id("productId")?,
            quantity: fields.required_i64("quantity")?,
            location: fields.optional_str("location")?,
        }),
        Category::Performance => CategoryRecord::Performance(PerformanceRecord {
            timestamp,
            service: fields.required_str("service")?,
            latency: fields.optional_f64("latency")?.unwrap_or(0.0),
            error_rate: fields.optional_f64("errorRate")?.unwrap_or(0.0),
            throughput: fields.optional_f64("throughput")?.unwrap_or(0.0),
        }),
        Category::UserActivity => CategoryRecord::UserActivity(UserActivityRecord {
            timestamp,
            user_id: fields.optional_id("userId")?,
            action: fields.required_str("action")?,
            duration: fields.optional_f64("duration")?.unwrap_or(0.0),
            platform: fields.optional_str("platform")?,
        }),
        Category::Social => CategoryRecord::Social(SocialRecord {
            timestamp,
            user_id: fields.optional_id("userId")?,
            action: fields.required_str("action")?,
            content: fields.optional_value("content"),
            engagement: fields.optional_value("engagement"),
        }),
    };

    Ok(record)
}

fn parse_timestamp(category: Category, value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| invalid(category, "timestamp", &e.to_string())),
        // Epoch milliseconds
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| invalid(category, "timestamp", "epoch millis out of range")),
        _ => Err(invalid(category, "timestamp", "expected RFC 3339 string or epoch millis")),
    }
}

fn invalid(category: Category, field: &str, reason: &str) -> AnalyticsError {
    AnalyticsError::InvalidField {
        category: category.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn missing(category: Category, field: &str) -> AnalyticsError {
    AnalyticsError::MissingField {
        category: category.to_string(),
        field: field.to_string(),
    }
}

/// Typed field accessors over one payload
struct Fields<'a> {
    category: Category,
    payload: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn present(&self, field: &str) -> Option<&'a Value> {
        self.payload.get(field).filter(|v| !v.is_null())
    }

    fn required_str(&self, field: &str) -> Result<String> {
        self.optional_str(field)?
            .ok_or_else(|| missing(self.category, field))
    }

    fn optional_str(&self, field: &str) -> Result<Option<String>> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(invalid(self.category, field, "expected string")),
        }
    }

    /// Identifiers may arrive as strings or numbers
    fn required_id(&self, field: &str) -> Result<String> {
        self.optional_id(field)?
            .ok_or_else(|| missing(self.category, field))
    }

    fn optional_id(&self, field: &str) -> Result<Option<String>> {
        match self.present(field) {
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            _ => self.optional_str(field),
        }
    }

    fn optional_f64(&self, field: &str) -> Result<Option<f64>> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid(self.category, field, "number out of range")),
            Some(_) => Err(invalid(self.category, field, "expected number")),
        }
    }

    fn required_i64(&self, field: &str) -> Result<i64> {
        match self.present(field) {
            None => Err(missing(self.category, field)),
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| invalid(self.category, field, "expected integer")),
            Some(_) => Err(invalid(self.category, field, "expected integer")),
        }
    }

    fn optional_value(&self, field: &str) -> Option<Value> {
        self.present(field).cloned()
    }

    fn products(&self) -> Result<Vec<ProductLine>> {
        let items = match self.present("products") {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(invalid(self.category, "products", "expected array")),
        };

        items
            .iter()
            .map(|item| {
                let Value::Object(line) = item else {
                    return Err(invalid(self.category, "products", "line item is not an object"));
                };
                let line = Fields {
                    category: self.category,
                    payload: line,
                };
                let quantity = match line.present("quantity") {
                    None => None,
                    Some(Value::Number(n)) => Some(unit_count(n).ok_or_else(|| {
                        invalid(self.category, "products.quantity", "expected non-negative number")
                    })?),
                    Some(_) => {
                        return Err(invalid(self.category, "products.quantity", "expected number"))
                    }
                };
                Ok(ProductLine {
                    category: line.optional_str("category")?,
                    price: line.optional_f64("price")?,
                    quantity,
                })
            })
            .collect()
    }
}

/// Line item quantity; fractional counts round to the nearest unit
fn unit_count(n: &serde_json::Number) -> Option<u64> {
    if let Some(units) = n.as_u64() {
        return Some(units);
    }
    n.as_f64()
        .filter(|units| units.is_finite() && *units >= 0.0)
        .map(|units| units.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn message(topic: Option<&str>, body: Value) -> BrokerMessage {
        BrokerMessage::new(topic.map(str::to_string), body.to_string())
    }

    #[test]
    fn test_decode_order_with_body_type() {
        let msg = message(
            None,
            json!({
                "type": "order.placed",
                "id": "evt-1",
                "timestamp": "2024-01-01T10:00:00Z",
                "data": {"orderId": "o1", "amount": 100}
            }),
        );

        let envelope = decode_message(&msg, now()).unwrap();
        assert_eq!(envelope.category, Category::Sales);
        assert_eq!(envelope.id.as_deref(), Some("evt-1"));
        assert_eq!(envelope.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(envelope.payload["orderId"], json!("o1"));
    }

    #[test]
    fn test_topic_used_when_body_has_no_type() {
        let msg = message(Some("performance.metric"), json!({"data": {"service": "api"}}));

        let envelope = decode_message(&msg, now()).unwrap();
        assert_eq!(envelope.category, Category::Performance);
        // Missing timestamp falls back to ingestion time
        assert_eq!(envelope.timestamp, now());
    }

    #[test]
    fn test_body_type_wins_over_topic() {
        let msg = message(Some("performance.metric"), json!({"type": "user.activity", "data": {}}));
        let envelope = decode_message(&msg, now()).unwrap();
        assert_eq!(envelope.category, Category::UserActivity);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let msg = message(None, json!({"type": "invoice.issued", "data": {}}));
        let err = decode_message(&msg, now()).unwrap_err();
        assert_eq!(err, AnalyticsError::UnknownCategory("invoice.issued".into()));
    }

    #[test]
    fn test_malformed_messages_rejected() {
        let not_json = BrokerMessage::new(None, "not json");
        assert!(matches!(
            decode_message(&not_json, now()),
            Err(AnalyticsError::MalformedMessage(_))
        ));

        let array = message(Some("order.placed"), json!([1, 2, 3]));
        assert!(matches!(
            decode_message(&array, now()),
            Err(AnalyticsError::MalformedMessage(_))
        ));

        let untyped = message(None, json!({"data": {}}));
        assert!(matches!(
            decode_message(&untyped, now()),
            Err(AnalyticsError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_epoch_millis_timestamp() {
        let msg = message(
            None,
            json!({"type": "social.engagement", "timestamp": 1704103200000i64, "data": {"action": "like"}}),
        );
        let envelope = decode_message(&msg, now()).unwrap();
        assert_eq!(envelope.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_validate_sales_defaults() {
        let msg = message(
            None,
            json!({
                "type": "order.placed",
                "data": {"orderId": 42, "products": [{"price": 5.0}]}
            }),
        );
        let envelope = decode_message(&msg, now()).unwrap();

        let CategoryRecord::Sales(sale) = validate(&envelope).unwrap() else {
            panic!("expected sales record");
        };
        assert_eq!(sale.order_id, "42");
        assert_eq!(sale.amount, 0.0);
        assert_eq!(sale.products.len(), 1);
        assert_eq!(sale.products[0].category, None);
        assert_eq!(sale.products[0].quantity, None);
    }

    #[test]
    fn test_validate_missing_required_fields() {
        let cases = [
            ("order.placed", json!({"amount": 10}), "orderId"),
            ("inventory.updated", json!({"quantity": 3}), "productId"),
            ("inventory.updated", json!({"productId": "p1"}), "quantity"),
            ("performance.metric", json!({"latency": 10}), "service"),
            ("user.activity", json!({"duration": 10}), "action"),
            ("social.engagement", json!({"userId": "u1"}), "action"),
        ];

        for (event_type, data, field) in cases {
            let msg = message(None, json!({"type": event_type, "data": data}));
            let envelope = decode_message(&msg, now()).unwrap();
            match validate(&envelope) {
                Err(AnalyticsError::MissingField { field: f, .. }) => assert_eq!(f, field),
                other => panic!("{}: expected missing {}, got {:?}", event_type, field, other),
            }
        }
    }

    #[test]
    fn test_validate_wrong_types() {
        let msg = message(
            None,
            json!({"type": "performance.metric", "data": {"service": "api", "latency": "fast"}}),
        );
        let envelope = decode_message(&msg, now()).unwrap();
        assert!(matches!(
            validate(&envelope),
            Err(AnalyticsError::InvalidField { ref field, .. }) if field == "latency"
        ));

        let msg = message(
            None,
            json!({"type": "inventory.updated", "data": {"productId": "p1", "quantity": 1.5}}),
        );
        let envelope = decode_message(&msg, now()).unwrap();
        assert!(matches!(validate(&envelope), Err(AnalyticsError::InvalidField { .. })));
    }

    #[test]
    fn test_fractional_product_quantity_rounds() {
        let msg = message(
            None,
            json!({
                "type": "order.placed",
                "data": {"orderId": "o1", "products": [
                    {"category": "bulk", "price": 2.0, "quantity": 1.5},
                    {"category": "bulk", "price": 2.0, "quantity": 0.4}
                ]}
            }),
        );
        let envelope = decode_message(&msg, now()).unwrap();

        let CategoryRecord::Sales(sale) = validate(&envelope).unwrap() else {
            panic!("expected sales record");
        };
        assert_eq!(sale.products[0].quantity, Some(2));
        assert_eq!(sale.products[1].quantity, Some(0));

        let msg = message(
            None,
            json!({"type": "order.placed", "data": {"orderId": "o2", "products": [{"quantity": -1}]}}),
        );
        let envelope = decode_message(&msg, now()).unwrap();
        assert!(matches!(
            validate(&envelope),
            Err(AnalyticsError::InvalidField { ref field, .. }) if field == "products.quantity"
        ));
    }

    #[test]
    fn test_validate_performance_absent_metrics_default_to_zero() {
        let msg = message(None, json!({"type": "performance.metric", "data": {"service": "api"}}));
        let envelope = decode_message(&msg, now()).unwrap();

        let CategoryRecord::Performance(sample) = validate(&envelope).unwrap() else {
            panic!("expected performance record");
        };
        assert_eq!(sample.latency, 0.0);
        assert_eq!(sample.error_rate, 0.0);
        assert_eq!(sample.throughput, 0.0);
    }
}
