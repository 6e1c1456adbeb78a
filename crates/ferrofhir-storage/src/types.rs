//! Result types returned by the search execution delegate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ferrofhir_core::{PrimaryKey, ResourceTypeId, SurrogateId};

/// One row of a search result, from either the match or the includes stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRow {
    /// The row's physical type id.
    pub resource_type_id: ResourceTypeId,
    /// The row's physical ordering key.
    pub resource_surrogate_id: SurrogateId,
    /// The resource's logical id.
    pub resource_id: String,
    /// The version id of this specific version.
    pub version_id: String,
    /// Whether the row belongs to the match stream (`false` = includes stream).
    pub is_match: bool,
    /// The full resource content as JSON.
    pub resource: Value,
}

impl SearchRow {
    /// The row's primary key.
    pub fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::new(self.resource_type_id, self.resource_surrogate_id)
    }
}

/// What one delegate invocation produced: rows plus continuation state.
#[derive(Debug, Clone, Default)]
pub struct SearchExecutionResult {
    /// Returned rows, match stream first.
    pub rows: Vec<SearchRow>,
    /// Opaque resume token for the match stream, if the page was cut short.
    pub match_continuation: Option<String>,
    /// Opaque resume token for the includes stream.
    pub includes_continuation: Option<String>,
    /// Whether the includes stream was truncated at the row cap.
    pub includes_truncated: bool,
    /// Total match count, if the caller asked for one.
    pub total: Option<u64>,
}

impl SearchExecutionResult {
    /// Creates a new empty result.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a result with rows.
    #[must_use]
    pub fn with_rows(rows: Vec<SearchRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Sets the match continuation token.
    #[must_use]
    pub fn with_match_continuation(mut self, token: impl Into<String>) -> Self {
        self.match_continuation = Some(token.into());
        self
    }

    /// Sets the includes continuation token.
    #[must_use]
    pub fn with_includes_continuation(mut self, token: impl Into<String>) -> Self {
        self.includes_continuation = Some(token.into());
        self
    }

    /// Marks the includes stream as truncated.
    #[must_use]
    pub fn with_includes_truncated(mut self, truncated: bool) -> Self {
        self.includes_truncated = truncated;
        self
    }

    /// Whether the result carries no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keys of the match-stream rows, in row order.
    pub fn match_keys(&self) -> Vec<PrimaryKey> {
        self.rows
            .iter()
            .filter(|r| r.is_match)
            .map(SearchRow::primary_key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(type_id: i16, sid: i64, is_match: bool) -> SearchRow {
        SearchRow {
            resource_type_id: ResourceTypeId(type_id),
            resource_surrogate_id: SurrogateId::new(sid).unwrap(),
            resource_id: format!("r{sid}"),
            version_id: "1".to_string(),
            is_match,
            resource: json!({}),
        }
    }

    #[test]
    fn test_empty_result() {
        let result = SearchExecutionResult::empty();
        assert!(result.is_empty());
        assert!(result.match_continuation.is_none());
        assert!(!result.includes_truncated);
    }

    #[test]
    fn test_match_keys_filters_includes_stream() {
        let result =
            SearchExecutionResult::with_rows(vec![row(1, 10, true), row(2, 20, false), row(1, 11, true)]);
        let keys = result.match_keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].resource_surrogate_id.as_i64(), 10);
        assert_eq!(keys[1].resource_surrogate_id.as_i64(), 11);
    }

    #[test]
    fn test_builder_chain() {
        let result = SearchExecutionResult::empty()
            .with_match_continuation("123")
            .with_includes_truncated(true);
        assert_eq!(result.match_continuation.as_deref(), Some("123"));
        assert!(result.includes_truncated);
    }
}
