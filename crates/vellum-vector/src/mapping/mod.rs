//! Compiled correspondence between record fields and storage columns.

mod builder;

use indexmap::IndexMap;

pub use builder::ModelBuilder;

use crate::error::{VectorError, VectorResult};
use crate::record::{DynamicRecord, Value};
use crate::schema::{DistanceFunction, IndexKind, StorageType};

/// Suffix of the vector column generated for an `embedded_text` field.
pub const EMBEDDING_COLUMN_SUFFIX: &str = "_embedding";

/// Vector settings of a vector column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorOptions {
    pub dimensions: usize,
    pub distance_function: DistanceFunction,
    pub index_kind: IndexKind,
}

/// How one field is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub(crate) field: String,
    pub(crate) column: String,
    pub(crate) storage_type: StorageType,
    pub(crate) is_key: bool,
    pub(crate) vector: Option<VectorOptions>,
    /// For `embedded_text` fields: the generated vector field.
    pub(crate) embedding_field: Option<String>,
    /// For generated vector fields: the text field they are computed from.
    pub(crate) embedding_source: Option<String>,
}

impl ColumnMapping {
    #[inline]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[inline]
    pub fn column(&self) -> &str {
        &self.column
    }

    #[inline]
    pub fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    #[inline]
    pub fn is_key(&self) -> bool {
        self.is_key
    }

    #[inline]
    pub fn is_vector(&self) -> bool {
        self.vector.is_some()
    }

    #[inline]
    pub fn vector_options(&self) -> Option<&VectorOptions> {
        self.vector.as_ref()
    }

    /// Returns whether the column is filled from another field's embedding.
    #[inline]
    pub fn is_generated(&self) -> bool {
        self.embedding_source.is_some()
    }

    #[inline]
    pub fn embedding_field(&self) -> Option<&str> {
        self.embedding_field.as_deref()
    }

    #[inline]
    pub fn embedding_source(&self) -> Option<&str> {
        self.embedding_source.as_deref()
    }

    /// Returns whether values of this field appear in caller records.
    #[inline]
    pub fn is_record_field(&self) -> bool {
        !self.is_key && !self.is_generated()
    }

    /// Checks that a value can be stored in this column.
    pub fn check_value(&self, value: &Value) -> VectorResult<()> {
        let accepted = match (self.storage_type, value) {
            (_, Value::Null) => !self.is_key,
            (StorageType::Text | StorageType::EmbeddedText, Value::Text(_)) => true,
            (StorageType::Uuid, Value::Text(text)) => uuid::Uuid::parse_str(text).is_ok(),
            (StorageType::Integer, Value::Integer(_)) => true,
            (StorageType::Float, Value::Float(_)) => true,
            (StorageType::Boolean, Value::Boolean(_)) => true,
            (StorageType::Bytes, Value::Bytes(_)) => true,
            (StorageType::Vector, Value::Vector(vector)) => {
                let expected = self.vector.map_or(0, |options| options.dimensions);
                if vector.len() != expected {
                    return Err(VectorError::mapping(format!(
                        "field {} expects a vector of {expected} dimensions, got {}",
                        self.field,
                        vector.len()
                    )));
                }
                true
            }
            _ => false,
        };

        if accepted {
            Ok(())
        } else {
            Err(VectorError::mapping(format!(
                "field {} of type {} cannot hold a {} value",
                self.field,
                self.storage_type,
                value.kind()
            )))
        }
    }
}

/// Field-to-column mapping of one collection.
///
/// Entries are ordered as declared; a generated vector entry follows its
/// source text entry. Immutable once built.
#[derive(Debug, Clone)]
pub struct RecordMapping {
    entries: IndexMap<String, ColumnMapping>,
    key_field: String,
    vector_fields: Vec<String>,
}

impl RecordMapping {
    /// Name of the key field.
    #[inline]
    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Mapping of the key field.
    pub fn key(&self) -> &ColumnMapping {
        &self.entries[self.key_field.as_str()]
    }

    /// Mapping of a field.
    #[inline]
    pub fn get(&self, field: &str) -> Option<&ColumnMapping> {
        self.entries.get(field)
    }

    /// All entries in storage order.
    pub fn entries(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.entries.values()
    }

    /// Entries that appear in caller records.
    pub fn record_fields(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.entries().filter(|entry| entry.is_record_field())
    }

    /// Vector field names, in order. Includes generated vector fields.
    #[inline]
    pub fn vector_fields(&self) -> &[String] {
        &self.vector_fields
    }

    /// Returns whether any column has the pgvector type.
    #[inline]
    pub fn has_vectors(&self) -> bool {
        !self.vector_fields.is_empty()
    }

    /// Returns whether any field is embedded on write.
    pub fn has_embedded_fields(&self) -> bool {
        self.entries().any(|entry| entry.embedding_field.is_some())
    }

    /// Resolves the vector field to search.
    ///
    /// `None` selects the first vector field. An `embedded_text` field name
    /// resolves to its generated vector field.
    pub fn resolve_vector_field(&self, name: Option<&str>) -> VectorResult<&ColumnMapping> {
        let Some(name) = name else {
            return self
                .vector_fields
                .first()
                .map(|field| &self.entries[field.as_str()])
                .ok_or_else(|| VectorError::invalid_argument("collection has no vector field"));
        };

        let entry = self
            .get(name)
            .ok_or_else(|| VectorError::invalid_argument(format!("unknown field {name}")))?;

        if entry.is_vector() {
            return Ok(entry);
        }

        match entry.embedding_field() {
            Some(generated) => Ok(&self.entries[generated]),
            None => Err(VectorError::invalid_argument(format!(
                "field {name} is not a vector field"
            ))),
        }
    }

    /// Resolves the generated vector field used for text search.
    pub fn resolve_embedded_field(&self, name: Option<&str>) -> VectorResult<&ColumnMapping> {
        let entry = match name {
            Some(_) => self.resolve_vector_field(name)?,
            None => self
                .entries()
                .find(|entry| entry.is_generated())
                .ok_or_else(|| {
                    VectorError::invalid_argument("collection has no embedded text field")
                })?,
        };

        if entry.is_generated() {
            Ok(entry)
        } else {
            Err(VectorError::invalid_argument(format!(
                "field {} is not generated from text",
                entry.field
            )))
        }
    }

    /// Validates a record and its key against the mapping.
    ///
    /// Unknown fields, generated fields, values of the wrong kind and a key
    /// field that disagrees with `key` are rejected.
    pub fn validate_record(&self, key: &Value, record: &DynamicRecord) -> VectorResult<()> {
        self.key().check_value(key)?;

        for (name, value) in record.iter() {
            let entry = self.get(name).ok_or_else(|| {
                VectorError::mapping(format!("record field {name} is not part of the mapping"))
            })?;

            if entry.is_key {
                if value != key {
                    return Err(VectorError::mapping(format!(
                        "record key field {name} does not match the key"
                    )));
                }
                continue;
            }

            if entry.is_generated() {
                return Err(VectorError::mapping(format!(
                    "field {name} is generated from {} and cannot be written",
                    entry.embedding_source.as_deref().unwrap_or_default()
                )));
            }

            entry.check_value(value)?;
        }

        Ok(())
    }

    /// Collects the texts to embed for a record, as `(generated field, text, dimensions)`.
    pub(crate) fn embedding_inputs<'a>(
        &'a self,
        record: &'a DynamicRecord,
    ) -> impl Iterator<Item = (&'a str, &'a str, usize)> + 'a {
        self.entries().filter_map(move |entry| {
            let generated = entry.embedding_field.as_deref()?;
            let text = record.get(&entry.field)?.as_text()?;
            let dimensions = self.entries[generated].vector?.dimensions;
            Some((generated, text, dimensions))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, SchemaDefinition};

    fn mapping() -> RecordMapping {
        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::data("title", StorageType::Text))
            .with_field(FieldDefinition::data("pages", StorageType::Integer))
            .with_field(FieldDefinition::data("rating", StorageType::Float))
            .with_field(FieldDefinition::vector(
                "embedding",
                3,
                DistanceFunction::Cosine,
            ));
        ModelBuilder::build(Some(&definition), None).unwrap()
    }

    #[test]
    fn test_validate_accepts_conforming_record() {
        let record = DynamicRecord::new()
            .with_field("title", "Republic")
            .with_field("rating", 4.5)
            .with_field("pages", Value::Null)
            .with_field("embedding", vec![0.1f32, 0.2, 0.3]);

        assert!(mapping().validate_record(&Value::from("a"), &record).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let record = DynamicRecord::new().with_field("author", "Plato");
        let err = mapping()
            .validate_record(&Value::from("a"), &record)
            .unwrap_err();
        assert!(matches!(err, VectorError::Mapping(_)));
    }

    #[test]
    fn test_validate_rejects_wrong_kind() {
        let record = DynamicRecord::new().with_field("pages", "many");
        assert!(matches!(
            mapping().validate_record(&Value::from("a"), &record),
            Err(VectorError::Mapping(_))
        ));

        let record = DynamicRecord::new().with_field("pages", 1.5);
        assert!(mapping().validate_record(&Value::from("a"), &record).is_err());
    }

    #[test]
    fn test_validate_rejects_integer_for_float_field() {
        let record = DynamicRecord::new().with_field("rating", 4);
        let err = mapping()
            .validate_record(&Value::from("a"), &record)
            .unwrap_err();
        assert!(matches!(err, VectorError::Mapping(_)));
    }

    #[test]
    fn test_validate_rejects_wrong_dimensions() {
        let record = DynamicRecord::new().with_field("embedding", vec![0.1f32, 0.2]);
        let err = mapping()
            .validate_record(&Value::from("a"), &record)
            .unwrap_err();
        assert!(err.to_string().contains("3 dimensions"));
    }

    #[test]
    fn test_validate_key_field_in_record() {
        let mapping = mapping();

        let same = DynamicRecord::new().with_field("id", "a");
        assert!(mapping.validate_record(&Value::from("a"), &same).is_ok());

        let other = DynamicRecord::new().with_field("id", "b");
        assert!(mapping.validate_record(&Value::from("a"), &other).is_err());

        assert!(
            mapping
                .validate_record(&Value::Null, &DynamicRecord::new())
                .is_err()
        );
    }

    #[test]
    fn test_resolve_vector_field() {
        let mapping = mapping();
        assert_eq!(mapping.resolve_vector_field(None).unwrap().field(), "embedding");
        assert!(mapping.resolve_vector_field(Some("title")).is_err());
        assert!(mapping.resolve_vector_field(Some("missing")).is_err());
        assert!(mapping.resolve_embedded_field(None).is_err());
    }
}
