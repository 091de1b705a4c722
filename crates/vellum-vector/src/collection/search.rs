//! Similarity search options, filters and results.

use serde::{Deserialize, Serialize};

use crate::error::{VectorError, VectorResult};
use crate::record::Value;

/// Number of results returned when none is requested.
const DEFAULT_TOP: usize = 3;

const MAX_ROWS: usize = i64::MAX as usize;

/// Predicate restricting search candidates by their scalar fields.
///
/// Fields are record field names, not column names. Vector fields cannot be
/// filtered on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Filter {
    /// Field equals the value; a `Null` value matches missing values.
    Eq(String, Value),
    /// Field equals any of the values; an empty list matches nothing.
    AnyOf(String, Vec<Value>),
    /// Field has no value.
    IsNull(String),
    /// All filters match; an empty list matches everything.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::AnyOf(field.into(), values.into_iter().collect())
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }
}

/// Options of a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Maximum number of results. Must be positive.
    pub top: usize,
    /// Number of best results to skip.
    pub skip: usize,
    /// Vector field to search; defaults to the first vector field.
    pub vector_field: Option<String>,
    /// Candidate filter.
    pub filter: Option<Filter>,
}

impl SearchOptions {
    /// Creates options returning at most `top` results.
    pub fn new(top: usize) -> Self {
        Self {
            top,
            ..Self::default()
        }
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_vector_field(mut self, field: impl Into<String>) -> Self {
        self.vector_field = Some(field.into());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub(crate) fn validate(&self) -> VectorResult<()> {
        if self.top == 0 {
            return Err(VectorError::invalid_argument("top must be greater than zero"));
        }
        // LIMIT and OFFSET are bigint.
        if self.top > MAX_ROWS || self.skip > MAX_ROWS {
            return Err(VectorError::invalid_argument(format!(
                "top and skip must not exceed {MAX_ROWS}"
            )));
        }
        Ok(())
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top: DEFAULT_TOP,
            skip: 0,
            vector_field: None,
            filter: None,
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult<K, R> {
    pub key: K,
    pub record: R,
    /// Similarity score; larger is closer.
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_top_is_invalid() {
        let err = SearchOptions::new(0).validate().unwrap_err();
        assert!(matches!(err, VectorError::InvalidArgument(_)));
        assert!(SearchOptions::default().validate().is_ok());
    }

    #[test]
    fn test_top_and_skip_must_fit_in_bigint() {
        let limit = i64::MAX as usize;
        assert!(SearchOptions::new(limit).with_skip(limit).validate().is_ok());

        for options in [
            SearchOptions::new(limit + 1),
            SearchOptions::new(1).with_skip(usize::MAX),
        ] {
            let err = options.validate().unwrap_err();
            assert!(matches!(err, VectorError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_options_from_json() {
        let options: SearchOptions = serde_json::from_str(
            r#"{
                "top": 5,
                "filter": { "op": "eq", "args": ["genre", { "kind": "text", "value": "epic" }] }
            }"#,
        )
        .unwrap();

        assert_eq!(options.top, 5);
        assert_eq!(options.skip, 0);
        assert_eq!(options.filter, Some(Filter::eq("genre", "epic")));
    }
}
