//! Runtime schema definitions for collections.
//!
//! A [`SchemaDefinition`] is plain data: an ordered list of
//! [`FieldDefinition`]s. It is validated when compiled by
//! [`ModelBuilder`](crate::ModelBuilder), not when constructed, so it can be
//! assembled incrementally or deserialized from configuration.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorageType {
    /// UTF-8 text.
    Text,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point number.
    Float,
    /// Boolean.
    Boolean,
    /// Raw bytes.
    Bytes,
    /// UUID, exchanged as its hyphenated text form.
    Uuid,
    /// Fixed-dimension vector of 32-bit floats.
    Vector,
    /// Text that is embedded before storage; stored as text plus a generated vector.
    EmbeddedText,
}

impl StorageType {
    /// Returns whether this type can be used for the key field.
    #[inline]
    pub fn is_key_capable(self) -> bool {
        matches!(self, Self::Text | Self::Integer | Self::Uuid)
    }

    /// Returns whether fields of this type carry vector options.
    #[inline]
    pub fn has_vector_options(self) -> bool {
        matches!(self, Self::Vector | Self::EmbeddedText)
    }
}

/// Distance function used for similarity search on a vector field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DistanceFunction {
    /// Cosine distance; scores are cosine similarity.
    #[default]
    Cosine,
    /// Negative inner product; scores are the inner product.
    DotProduct,
    /// L2 distance; scores are the negated distance.
    Euclidean,
    /// L1 distance; scores are the negated distance.
    Manhattan,
}

impl DistanceFunction {
    /// Returns the pgvector distance operator.
    pub fn operator(self) -> &'static str {
        match self {
            Self::Cosine => "<=>",
            Self::DotProduct => "<#>",
            Self::Euclidean => "<->",
            Self::Manhattan => "<+>",
        }
    }

    /// Returns the pgvector index operator class.
    pub fn operator_class(self) -> &'static str {
        match self {
            Self::Cosine => "vector_cosine_ops",
            Self::DotProduct => "vector_ip_ops",
            Self::Euclidean => "vector_l2_ops",
            Self::Manhattan => "vector_l1_ops",
        }
    }

    /// Converts a distance SQL expression into a score where larger is closer.
    pub fn score_expression(self, distance: &str) -> String {
        match self {
            Self::Cosine => format!("(1 - ({distance}))::float8"),
            Self::DotProduct | Self::Euclidean | Self::Manhattan => {
                format!("(-({distance}))::float8")
            }
        }
    }
}

/// Index built for a vector field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndexKind {
    /// HNSW graph index (slower build, better recall).
    #[default]
    Hnsw,
    /// IVFFlat index (faster build, good recall).
    IvfFlat,
    /// No index: exact sequential scan.
    Flat,
}

/// Description of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name as seen in records.
    pub name: String,
    /// Storage type.
    pub storage_type: StorageType,
    /// Whether this is the key field.
    #[serde(default)]
    pub is_key: bool,
    /// Dimensions of vector and embedded-text fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_dimensions: Option<usize>,
    /// Distance function of vector and embedded-text fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_function: Option<DistanceFunction>,
    /// Index of vector and embedded-text fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_kind: Option<IndexKind>,
    /// Storage column name, when it differs from the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
}

impl FieldDefinition {
    /// Creates a field with the given name and storage type.
    pub fn new(name: impl Into<String>, storage_type: StorageType) -> Self {
        Self {
            name: name.into(),
            storage_type,
            is_key: false,
            vector_dimensions: None,
            distance_function: None,
            index_kind: None,
            column_name: None,
        }
    }

    /// Creates the key field.
    pub fn key(name: impl Into<String>, storage_type: StorageType) -> Self {
        Self {
            is_key: true,
            ..Self::new(name, storage_type)
        }
    }

    /// Creates a scalar data field.
    pub fn data(name: impl Into<String>, storage_type: StorageType) -> Self {
        Self::new(name, storage_type)
    }

    /// Creates a vector field.
    pub fn vector(name: impl Into<String>, dimensions: usize, distance: DistanceFunction) -> Self {
        Self {
            vector_dimensions: Some(dimensions),
            distance_function: Some(distance),
            ..Self::new(name, StorageType::Vector)
        }
    }

    /// Creates a text field whose embedding is generated on write.
    pub fn embedded_text(
        name: impl Into<String>,
        dimensions: usize,
        distance: DistanceFunction,
    ) -> Self {
        Self {
            vector_dimensions: Some(dimensions),
            distance_function: Some(distance),
            ..Self::new(name, StorageType::EmbeddedText)
        }
    }

    /// Sets the storage column name.
    pub fn with_column_name(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = Some(column_name.into());
        self
    }

    /// Sets the vector index kind.
    pub fn with_index_kind(mut self, index_kind: IndexKind) -> Self {
        self.index_kind = Some(index_kind);
        self
    }

    /// Returns the storage column name.
    #[inline]
    pub fn storage_name(&self) -> &str {
        self.column_name.as_deref().unwrap_or(&self.name)
    }
}

/// Ordered field descriptors of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Fields in storage order.
    pub fields: Vec<FieldDefinition>,
}

impl SchemaDefinition {
    /// Creates an empty definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Returns the field with the given name.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Returns the fields marked as key.
    pub fn key_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|field| field.is_key)
    }
}

impl FromIterator<FieldDefinition> for SchemaDefinition {
    fn from_iter<I: IntoIterator<Item = FieldDefinition>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_definition_from_json() {
        let definition: SchemaDefinition = serde_json::from_str(
            r#"{
                "fields": [
                    { "name": "id", "storage_type": "text", "is_key": true },
                    { "name": "title", "storage_type": "text" },
                    {
                        "name": "embedding",
                        "storage_type": "vector",
                        "vector_dimensions": 3,
                        "distance_function": "cosine",
                        "index_kind": "ivf_flat"
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(definition.fields.len(), 3);
        assert_eq!(definition.key_fields().count(), 1);

        let embedding = definition.field("embedding").unwrap();
        assert_eq!(embedding.vector_dimensions, Some(3));
        assert_eq!(embedding.index_kind, Some(IndexKind::IvfFlat));
    }

    #[test]
    fn test_storage_name_defaults_to_field_name() {
        let field = FieldDefinition::data("title", StorageType::Text);
        assert_eq!(field.storage_name(), "title");

        let renamed = field.with_column_name("book_title");
        assert_eq!(renamed.storage_name(), "book_title");
    }

    #[test]
    fn test_enum_string_forms() {
        assert_eq!(StorageType::EmbeddedText.to_string(), "embedded_text");
        assert_eq!(
            DistanceFunction::from_str("dot_product").unwrap(),
            DistanceFunction::DotProduct
        );
        assert_eq!(IndexKind::default(), IndexKind::Hnsw);
    }

    #[test]
    fn test_score_expressions() {
        assert_eq!(
            DistanceFunction::Cosine.score_expression("a <=> b"),
            "(1 - (a <=> b))::float8"
        );
        assert_eq!(
            DistanceFunction::Euclidean.score_expression("a <-> b"),
            "(-(a <-> b))::float8"
        );
    }
}
