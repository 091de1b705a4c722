//! Prelude module for vellum-vector.
//!
//! Re-exports the types needed to define, open and query collections.
//!
//! ```rust,no_run
//! use vellum_vector::prelude::*;
//!
//! let definition = SchemaDefinition::new()
//!     .with_field(FieldDefinition::key("id", StorageType::Text))
//!     .with_field(FieldDefinition::vector("embedding", 3, DistanceFunction::Cosine));
//!
//! let store = VectorStore::connect(PgConfig::new("postgresql://localhost/vellum"))?;
//! let books = store.dynamic_collection::<String>("books", definition, CollectionOptions::new())?;
//! # Ok::<(), VectorError>(())
//! ```

pub use tokio_util::sync::CancellationToken;

pub use crate::{
    Collection, CollectionOptions, DistanceFunction, DynamicCollection, DynamicRecord,
    EmbeddingGenerator, FieldDefinition, Filter, IndexKind, PgConfig, Record, RecordKey,
    SchemaDefinition, SearchOptions, SearchResult, StorageType, Value, VectorError, VectorResult,
    VectorStore,
};
