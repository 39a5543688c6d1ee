//! Error taxonomy for the analytics pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Errors surfaced by ingestion and query paths
///
/// Validation variants are recovered locally by the ingestion loop (the
/// event is logged and dropped). `Compute` and `Unavailable` come out of
/// the query path. Variants carry owned strings so a single failure can be
/// shared by every waiter of a coalesced recomputation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    #[error("unknown event category: {0}")]
    UnknownCategory(String),

    #[error("{category} event missing required field `{field}`")]
    MissingField { category: String, field: String },

    #[error("{category} event has invalid field `{field}`: {reason}")]
    InvalidField {
        category: String,
        field: String,
        reason: String,
    },

    #[error("malformed broker message: {0}")]
    MalformedMessage(String),

    #[error("duplicate event id: {0}")]
    Duplicate(String),

    #[error("failed to compute {view}: {reason}")]
    Compute { view: String, reason: String },

    #[error("summary unavailable: {0}")]
    Unavailable(String),
}

impl AnalyticsError {
    /// True for the errors that reject an event at ingestion time
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AnalyticsError::UnknownCategory(_)
                | AnalyticsError::MissingField { .. }
                | AnalyticsError::InvalidField { .. }
                | AnalyticsError::MalformedMessage(_)
                | AnalyticsError::Duplicate(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(AnalyticsError::UnknownCategory("x".into()).is_validation());
        assert!(AnalyticsError::Duplicate("e1".into()).is_validation());
        assert!(!AnalyticsError::Unavailable("sales.daily".into()).is_validation());
        assert!(!AnalyticsError::Compute {
            view: "sales.daily".into(),
            reason: "boom".into(),
        }
        .is_validation());
    }

    #[test]
    fn test_error_messages() {
        let err = AnalyticsError::MissingField {
            category: "inventory".into(),
            field: "productId".into(),
        };
        assert_eq!(
            err.to_string(),
            "inventory event missing required field `productId`"
        );
    }
}
