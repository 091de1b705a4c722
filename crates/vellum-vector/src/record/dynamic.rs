//! Field-name-to-value record with no static shape.

use derive_more::{Deref, DerefMut};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::Value;

/// A record whose shape is only known at runtime.
///
/// Fields keep insertion order; equality ignores order.
///
/// ```
/// use vellum_vector::{DynamicRecord, Value};
///
/// let record = DynamicRecord::new()
///     .with_field("title", "Republic")
///     .with_field("embedding", vec![0.1f32, 0.2, 0.3]);
///
/// assert_eq!(record.get("title"), Some(&Value::from("Republic")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deref, DerefMut, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicRecord(IndexMap<String, Value>);

impl DynamicRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    /// Removes a field, returning its value.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.0.shift_remove(name)
    }

    /// Returns a copy holding only the named fields.
    pub fn restricted_to<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        let fields: Vec<&str> = fields.into_iter().collect();
        self.0
            .iter()
            .filter(|(name, _)| fields.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Returns the underlying map.
    pub fn into_inner(self) -> IndexMap<String, Value> {
        self.0
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for DynamicRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

impl IntoIterator for DynamicRecord {
    type IntoIter = indexmap::map::IntoIter<String, Value>;
    type Item = (String, Value);

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<IndexMap<String, Value>> for DynamicRecord {
    fn from(fields: IndexMap<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_order() {
        let first = DynamicRecord::new()
            .with_field("a", 1)
            .with_field("b", true);
        let second = DynamicRecord::new()
            .with_field("b", true)
            .with_field("a", 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_restricted_to() {
        let record = DynamicRecord::new()
            .with_field("title", "Republic")
            .with_field("extra", 7);

        let restricted = record.restricted_to(["title", "missing"]);
        assert_eq!(restricted.len(), 1);
        assert!(restricted.contains_key("title"));
    }

    #[test]
    fn test_take_preserves_order() {
        let mut record: DynamicRecord = [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();
        assert_eq!(record.take("b"), Some(Value::Integer(2)));

        let names: Vec<_> = record.keys().cloned().collect();
        assert_eq!(names, ["a", "c"]);
    }
}
