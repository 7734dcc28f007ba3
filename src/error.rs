//! Error types for metrics operations.

use crate::types::RecordId;
use serde::Serialize;
use thiserror::Error;

/// Main error type for metrics operations.
///
/// A cache miss is not an error; callers fall through to recomputation.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MetricsError {
    /// I/O or permission failure reported by the record store.
    #[error("Store query failed: {0}")]
    StoreQuery(String),

    /// Aggregation produced an unusable result or panicked.
    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("{collection} record not found: {id}")]
    NotFound {
        collection: &'static str,
        id: RecordId,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MetricsError {
    /// Whether retrying the same store call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MetricsError::StoreQuery(_))
    }
}

/// Result type for metrics operations.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Uniform `{success, data}` / `{success: false, error}` shape for callers
/// that hand results across a serialization boundary.
#[derive(Clone, Debug, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Outcome {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Outcome {
                success: false,
                data: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_shapes() {
        let ok: Outcome<u32> = Ok(7).into();
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"success": true, "data": 7})
        );

        let err: Outcome<u32> = Err(MetricsError::StoreQuery("permission denied".into())).into();
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"success": false, "error": "Store query failed: permission denied"})
        );
    }

    #[test]
    fn test_retryable() {
        assert!(MetricsError::StoreQuery("io".into()).is_retryable());
        assert!(!MetricsError::InvalidInput("bad".into()).is_retryable());
    }
}
