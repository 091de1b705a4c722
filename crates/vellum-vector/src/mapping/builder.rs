//! Compiles a [`SchemaDefinition`] into a [`RecordMapping`].

use std::collections::HashSet;

use indexmap::IndexMap;

use super::{ColumnMapping, EMBEDDING_COLUMN_SUFFIX, RecordMapping, VectorOptions};
use crate::TRACING_TARGET_MAPPING;
use crate::embedding::EmbeddingGenerator;
use crate::error::{VectorError, VectorResult};
use crate::schema::{DistanceFunction, FieldDefinition, IndexKind, SchemaDefinition, StorageType};
use crate::sql::check_identifier;

/// Largest dimension count of the pgvector `vector` type.
const MAX_VECTOR_DIMENSIONS: usize = 16_000;

/// Largest dimension count pgvector can index.
const MAX_INDEXED_DIMENSIONS: usize = 2_000;

/// Builds record mappings from schema definitions.
///
/// Pure: performs no I/O and keeps no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelBuilder;

impl ModelBuilder {
    /// Compiles `definition` into a mapping.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::Schema`] if the definition is missing, does not
    /// have exactly one key field of a key-capable type, declares a vector
    /// field without positive dimensions, repeats a field or column name, or
    /// declares `embedded_text` fields without an embedding generator.
    pub fn build(
        definition: Option<&SchemaDefinition>,
        embedding_generator: Option<&dyn EmbeddingGenerator>,
    ) -> VectorResult<RecordMapping> {
        let definition = definition.ok_or_else(|| {
            VectorError::schema("a schema definition is required for collections without a static record type")
        })?;

        let mut keys = definition.key_fields();
        let key = match (keys.next(), keys.next()) {
            (Some(key), None) => key,
            (None, _) => return Err(VectorError::schema("no key field is defined")),
            (Some(_), Some(_)) => {
                return Err(VectorError::schema("more than one key field is defined"));
            }
        };

        if !key.storage_type.is_key_capable() {
            return Err(VectorError::schema(format!(
                "key field {} has unsupported type {}",
                key.name, key.storage_type
            )));
        }

        let mut entries = IndexMap::with_capacity(definition.fields.len());
        let mut columns = HashSet::with_capacity(definition.fields.len());
        let mut vector_fields = Vec::new();

        for field in &definition.fields {
            check_identifier("field", &field.name)?;
            check_identifier("column", field.storage_name())?;

            let vector = vector_options(field)?;
            let mut entry = ColumnMapping {
                field: field.name.clone(),
                column: field.storage_name().to_owned(),
                storage_type: field.storage_type,
                is_key: field.is_key,
                vector: None,
                embedding_field: None,
                embedding_source: None,
            };

            let generated = match field.storage_type {
                StorageType::Vector => {
                    entry.vector = vector;
                    None
                }
                StorageType::EmbeddedText => {
                    if embedding_generator.is_none() {
                        return Err(VectorError::schema(format!(
                            "field {} is embedded text but no embedding generator was supplied",
                            field.name
                        )));
                    }

                    let name = format!("{}{EMBEDDING_COLUMN_SUFFIX}", field.name);
                    let column = format!("{}{EMBEDDING_COLUMN_SUFFIX}", field.storage_name());
                    check_identifier("column", &column)?;

                    entry.embedding_field = Some(name.clone());
                    Some(ColumnMapping {
                        field: name,
                        column,
                        storage_type: StorageType::Vector,
                        is_key: false,
                        vector,
                        embedding_field: None,
                        embedding_source: Some(field.name.clone()),
                    })
                }
                _ => None,
            };

            for entry in std::iter::once(entry).chain(generated) {
                if !columns.insert(entry.column.clone()) {
                    return Err(VectorError::schema(format!(
                        "column {} is mapped more than once",
                        entry.column
                    )));
                }
                if entry.is_vector() {
                    vector_fields.push(entry.field.clone());
                }
                if entries.insert(entry.field.clone(), entry).is_some() {
                    return Err(VectorError::schema(format!(
                        "field {} is defined more than once",
                        field.name
                    )));
                }
            }
        }

        tracing::debug!(
            target: TRACING_TARGET_MAPPING,
            key_field = %key.name,
            fields = entries.len(),
            vector_fields = ?vector_fields,
            "Compiled record mapping"
        );

        Ok(RecordMapping {
            entries,
            key_field: key.name.clone(),
            vector_fields,
        })
    }
}

fn vector_options(field: &FieldDefinition) -> VectorResult<Option<VectorOptions>> {
    if !field.storage_type.has_vector_options() {
        return Ok(None);
    }

    let dimensions = match field.vector_dimensions {
        Some(dimensions) if dimensions > 0 => dimensions,
        _ => {
            return Err(VectorError::schema(format!(
                "vector field {} requires positive dimensions",
                field.name
            )));
        }
    };

    if dimensions > MAX_VECTOR_DIMENSIONS {
        return Err(VectorError::schema(format!(
            "vector field {} exceeds {MAX_VECTOR_DIMENSIONS} dimensions",
            field.name
        )));
    }

    let distance_function = field.distance_function.unwrap_or_default();
    let index_kind = field.index_kind.unwrap_or_default();

    if index_kind != IndexKind::Flat && dimensions > MAX_INDEXED_DIMENSIONS {
        return Err(VectorError::schema(format!(
            "vector field {} has {dimensions} dimensions, indexes support at most {MAX_INDEXED_DIMENSIONS}",
            field.name
        )));
    }

    if index_kind == IndexKind::IvfFlat && distance_function == DistanceFunction::Manhattan {
        return Err(VectorError::schema(format!(
            "vector field {} uses manhattan distance, which ivf_flat cannot index",
            field.name
        )));
    }

    Ok(Some(VectorOptions {
        dimensions,
        distance_function,
        index_kind,
    }))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::BoxError;
    use crate::sql::MAX_IDENTIFIER_LEN;

    struct NoopGenerator;

    #[async_trait]
    impl EmbeddingGenerator for NoopGenerator {
        async fn generate_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BoxError> {
            Ok(inputs.iter().map(|_| vec![0.0; 3]).collect())
        }
    }

    fn books() -> SchemaDefinition {
        SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::data("title", StorageType::Text))
            .with_field(FieldDefinition::vector(
                "embedding",
                3,
                DistanceFunction::Cosine,
            ))
    }

    #[test]
    fn test_build_valid_definition() {
        let mapping = ModelBuilder::build(Some(&books()), None).unwrap();

        assert_eq!(mapping.key_field(), "id");
        assert_eq!(mapping.key().storage_type(), StorageType::Text);
        assert_eq!(mapping.vector_fields(), ["embedding"]);

        let embedding = mapping.get("embedding").unwrap();
        assert!(embedding.is_vector());
        assert_eq!(embedding.vector_options().unwrap().dimensions, 3);
        assert_eq!(
            embedding.vector_options().unwrap().index_kind,
            IndexKind::Hnsw
        );
    }

    #[test]
    fn test_key_field_matches_definition_for_any_position() {
        for position in 0..3 {
            let mut fields = vec![
                FieldDefinition::data("a", StorageType::Text),
                FieldDefinition::data("b", StorageType::Boolean),
            ];
            fields.insert(position, FieldDefinition::key("pk", StorageType::Integer));
            let definition: SchemaDefinition = fields.into_iter().collect();

            let mapping = ModelBuilder::build(Some(&definition), None).unwrap();
            assert_eq!(mapping.key_field(), "pk");
        }
    }

    #[test]
    fn test_missing_definition_fails() {
        let err = ModelBuilder::build(None, None).unwrap_err();
        assert!(matches!(err, VectorError::Schema(_)));
    }

    #[test]
    fn test_key_count_must_be_one() {
        let no_key = SchemaDefinition::new().with_field(FieldDefinition::data("a", StorageType::Text));
        assert!(matches!(
            ModelBuilder::build(Some(&no_key), None),
            Err(VectorError::Schema(_))
        ));

        let two_keys = books().with_field(FieldDefinition::key("other", StorageType::Text));
        assert!(matches!(
            ModelBuilder::build(Some(&two_keys), None),
            Err(VectorError::Schema(_))
        ));
    }

    #[test]
    fn test_key_type_must_be_key_capable() {
        let definition =
            SchemaDefinition::new().with_field(FieldDefinition::key("id", StorageType::Float));
        assert!(ModelBuilder::build(Some(&definition), None).is_err());
    }

    #[test]
    fn test_vector_dimensions_must_be_positive() {
        let zero = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::vector("v", 0, DistanceFunction::Cosine));
        assert!(matches!(
            ModelBuilder::build(Some(&zero), None),
            Err(VectorError::Schema(_))
        ));

        let missing = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::new("v", StorageType::Vector));
        assert!(ModelBuilder::build(Some(&missing), None).is_err());
    }

    #[test]
    fn test_duplicate_columns_fail() {
        let definition = books().with_field(
            FieldDefinition::data("subtitle", StorageType::Text).with_column_name("title"),
        );
        let err = ModelBuilder::build(Some(&definition), None).unwrap_err();
        assert!(err.to_string().contains("column title"));

        let duplicate_field = books().with_field(FieldDefinition::data("title", StorageType::Bytes));
        assert!(ModelBuilder::build(Some(&duplicate_field), None).is_err());
    }

    #[test]
    fn test_embedded_text_fans_out() {
        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::embedded_text(
                "summary",
                3,
                DistanceFunction::DotProduct,
            ));

        let mapping = ModelBuilder::build(Some(&definition), Some(&NoopGenerator)).unwrap();

        let summary = mapping.get("summary").unwrap();
        assert!(!summary.is_vector());
        assert_eq!(summary.embedding_field(), Some("summary_embedding"));

        let generated = mapping.get("summary_embedding").unwrap();
        assert!(generated.is_generated());
        assert_eq!(generated.column(), "summary_embedding");
        assert_eq!(generated.embedding_source(), Some("summary"));
        assert_eq!(mapping.vector_fields(), ["summary_embedding"]);

        let record_fields: Vec<_> = mapping.record_fields().map(|e| e.field()).collect();
        assert_eq!(record_fields, ["summary"]);

        assert_eq!(
            mapping.resolve_vector_field(Some("summary")).unwrap().field(),
            "summary_embedding"
        );
        assert_eq!(
            mapping.resolve_embedded_field(None).unwrap().field(),
            "summary_embedding"
        );
    }

    #[test]
    fn test_embedded_text_requires_generator() {
        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::embedded_text(
                "summary",
                3,
                DistanceFunction::Cosine,
            ));
        assert!(matches!(
            ModelBuilder::build(Some(&definition), None),
            Err(VectorError::Schema(_))
        ));
    }

    #[test]
    fn test_generated_column_collision_fails() {
        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::embedded_text(
                "summary",
                3,
                DistanceFunction::Cosine,
            ))
            .with_field(FieldDefinition::data("summary_embedding", StorageType::Text));
        assert!(ModelBuilder::build(Some(&definition), Some(&NoopGenerator)).is_err());
    }

    #[test]
    fn test_index_constraints() {
        let large = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::vector("v", 3_072, DistanceFunction::Cosine));
        assert!(ModelBuilder::build(Some(&large), None).is_err());

        let large_flat = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(
                FieldDefinition::vector("v", 3_072, DistanceFunction::Cosine)
                    .with_index_kind(IndexKind::Flat),
            );
        assert!(ModelBuilder::build(Some(&large_flat), None).is_ok());

        let l1_ivf = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(
                FieldDefinition::vector("v", 3, DistanceFunction::Manhattan)
                    .with_index_kind(IndexKind::IvfFlat),
            );
        assert!(ModelBuilder::build(Some(&l1_ivf), None).is_err());
    }

    #[test]
    fn test_identifier_limits() {
        let long = "x".repeat(MAX_IDENTIFIER_LEN + 1);
        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::data(long, StorageType::Text));
        assert!(ModelBuilder::build(Some(&definition), None).is_err());

        let empty = SchemaDefinition::new().with_field(FieldDefinition::key("", StorageType::Text));
        assert!(ModelBuilder::build(Some(&empty), None).is_err());
    }
}
