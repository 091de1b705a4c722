#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging.

/// Tracing target for collection operations.
///
/// Use this target for logging table creation, record reads and writes, searches and disposal.
pub const TRACING_TARGET_COLLECTION: &str = "vellum_vector::collection";

/// Tracing target for schema compilation.
pub const TRACING_TARGET_MAPPING: &str = "vellum_vector::mapping";

/// Tracing target for embedding generation.
pub const TRACING_TARGET_EMBEDDING: &str = "vellum_vector::embedding";

mod collection;
mod embedding;
mod error;
mod mapping;
pub mod prelude;
mod record;
pub mod schema;
mod sql;
mod store;

pub use collection::{
    Collection, CollectionOptions, CollectionState, DynamicCollection, Filter, SearchOptions,
    SearchResult,
};
pub use embedding::{EmbeddingGenerator, SharedEmbeddingGenerator};
pub use error::{BoxError, VectorError, VectorResult};
pub use mapping::{ColumnMapping, EMBEDDING_COLUMN_SUFFIX, ModelBuilder, RecordMapping, VectorOptions};
pub use record::{DynamicRecord, Record, RecordKey, Value, ValueKind};
pub use schema::{DistanceFunction, FieldDefinition, IndexKind, SchemaDefinition, StorageType};
pub use sql::{DEFAULT_SCHEMA, TableRef};
pub use store::VectorStore;
pub use vellum_postgres::{ConnectionHandle, PgClient, PgConfig, PgError};
