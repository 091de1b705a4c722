//! Schema-mapped record collections backed by one PostgreSQL table each.

mod search;

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use diesel::OptionalExtension;
use diesel::sql_types::Text;
use diesel_async::RunQueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt;
pub use search::{Filter, SearchOptions, SearchResult};
use strum::{Display, IntoStaticStr};
use tokio_util::sync::CancellationToken;
use vellum_postgres::{ConnectionHandle, PgClient, PgConfig, PgError};

use crate::TRACING_TARGET_COLLECTION;
use crate::embedding::{SharedEmbeddingGenerator, generate_checked};
use crate::error::{VectorError, VectorResult};
use crate::mapping::{ColumnMapping, ModelBuilder, RecordMapping};
use crate::record::{DynamicRecord, Record, RecordKey, Value};
use crate::schema::SchemaDefinition;
use crate::sql::{
    self, BoxedQuery, ColumnRow, PresentRow, RecordRow, ScoredRecordRow, Statements, TableRef,
    bind_key, bind_keys, bind_value, bind_vector, boxed, decode_record, render_filter,
};

/// Collection whose records are [`DynamicRecord`]s.
pub type DynamicCollection<K = String> = Collection<K, DynamicRecord>;

/// Options shared by every way of constructing a collection.
#[derive(Clone, Default)]
pub struct CollectionOptions {
    /// Field layout; required unless the record type supplies one.
    pub definition: Option<SchemaDefinition>,
    /// Generator for `embedded_text` fields and text search.
    pub embedding_generator: Option<SharedEmbeddingGenerator>,
    /// PostgreSQL schema of the table; defaults to `public`.
    pub schema: Option<String>,
}

impl CollectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(mut self, definition: SchemaDefinition) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn with_embedding_generator(mut self, generator: SharedEmbeddingGenerator) -> Self {
        self.embedding_generator = Some(generator);
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

impl fmt::Debug for CollectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionOptions")
            .field("definition", &self.definition)
            .field("embedding_generator", &self.embedding_generator.is_some())
            .field("schema", &self.schema)
            .finish()
    }
}

/// Lifecycle state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CollectionState {
    /// Operations are accepted.
    Ready,
    /// The connection reference was released; operations fail.
    Disposed,
}

/// A named set of records stored in one table.
///
/// Records are keyed by `K` and exchanged as `R`. Every operation validates
/// its input against the collection's [`RecordMapping`], races against the
/// given [`CancellationToken`] and fails with [`VectorError::UseAfterDispose`]
/// once [`Collection::dispose`] was called.
///
/// Collections hold one reference to a shared [`ConnectionHandle`]. Disposing
/// (or dropping) a collection releases that reference; the pool closes only
/// when the last reference of an owning lineage is gone.
pub struct Collection<K: RecordKey, R: Record = DynamicRecord> {
    table: TableRef,
    mapping: Arc<RecordMapping>,
    statements: Arc<Statements>,
    handle: ConnectionHandle,
    embedding_generator: Option<SharedEmbeddingGenerator>,
    _marker: PhantomData<fn() -> (K, R)>,
}

impl<K: RecordKey, R: Record> Collection<K, R> {
    /// Connects to a new pool owned by the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the schema does
    /// not compile.
    pub fn connect(
        config: PgConfig,
        name: &str,
        options: CollectionOptions,
    ) -> VectorResult<Self> {
        let client = config.build()?;
        Self::new(ConnectionHandle::acquire(client, true), name, options)
    }

    /// Wraps an existing data source.
    ///
    /// With `owns_resource` the pool is closed when the collection is
    /// disposed; otherwise the caller stays responsible for it.
    pub fn from_client(
        client: PgClient,
        owns_resource: bool,
        name: &str,
        options: CollectionOptions,
    ) -> VectorResult<Self> {
        Self::new(ConnectionHandle::acquire(client, owns_resource), name, options)
    }

    /// Shares the data source of an existing handle.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::Released`] (as [`VectorError::Store`]) if `handle`
    /// was already released.
    pub fn from_handle(
        handle: &ConnectionHandle,
        name: &str,
        options: CollectionOptions,
    ) -> VectorResult<Self> {
        Self::new(handle.retain()?, name, options)
    }

    fn new(handle: ConnectionHandle, name: &str, options: CollectionOptions) -> VectorResult<Self> {
        let CollectionOptions {
            definition,
            embedding_generator,
            schema,
        } = options;

        let table = TableRef::new(schema.as_deref(), name)?;
        let definition = definition.or_else(R::definition);
        let mapping = ModelBuilder::build(definition.as_ref(), embedding_generator.as_deref())?;

        let key_type = mapping.key().storage_type();
        if key_type != K::STORAGE_TYPE {
            return Err(VectorError::schema(format!(
                "key field {} is {key_type}, but the collection key type requires {}",
                mapping.key_field(),
                K::STORAGE_TYPE
            )));
        }

        let statements = Statements::new(&table, &mapping);

        tracing::debug!(
            target: TRACING_TARGET_COLLECTION,
            collection = %table,
            share_count = handle.share_count(),
            "Collection created"
        );

        Ok(Self {
            table,
            mapping: Arc::new(mapping),
            statements: Arc::new(statements),
            handle,
            embedding_generator,
            _marker: PhantomData,
        })
    }

    /// Returns the collection name.
    #[inline]
    pub fn name(&self) -> &str {
        self.table.name()
    }

    /// Returns the backing table.
    #[inline]
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Returns the compiled field mapping.
    #[inline]
    pub fn mapping(&self) -> &RecordMapping {
        &self.mapping
    }

    /// Returns this collection's connection reference.
    ///
    /// New collections can share it through [`Collection::from_handle`].
    #[inline]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }

    #[inline]
    pub fn state(&self) -> CollectionState {
        if self.handle.is_released() {
            CollectionState::Disposed
        } else {
            CollectionState::Ready
        }
    }

    /// Releases the connection reference. Later calls are no-ops.
    pub fn dispose(&self) {
        if self.handle.is_released() {
            return;
        }
        self.handle.release();
        tracing::debug!(
            target: TRACING_TARGET_COLLECTION,
            collection = %self.table,
            "Collection disposed"
        );
    }

    /// Creates the table and its vector indexes, or checks an existing table.
    ///
    /// Runs under a transaction-scoped advisory lock on the qualified table
    /// name, so concurrent calls create the table once and the others check it.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::SchemaMismatch`] if the existing table lacks a
    /// mapped column, stores it with another type or has no unique index on
    /// the key column.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table))]
    pub async fn ensure_exists(&self, cancel: &CancellationToken) -> VectorResult<()> {
        self.run(cancel, async move {
            let mut conn = self.handle.get_connection().await?;
            let statements = Arc::clone(&self.statements);
            let qualified = self.table.qualified();

            let existing = conn
                .transaction::<_, VectorError, _>(|conn| {
                    async move {
                        boxed(sql::LOCK_TABLE)
                            .bind::<Text, _>(qualified.clone())
                            .execute(conn)
                            .await?;

                        let table: PresentRow = boxed(sql::TABLE_EXISTS)
                            .bind::<Text, _>(qualified.clone())
                            .get_result(conn)
                            .await?;
                        if table.present {
                            let columns: Vec<ColumnRow> = boxed(sql::INSPECT_COLUMNS)
                                .bind::<Text, _>(qualified)
                                .load(conn)
                                .await?;
                            return Ok(Some(columns));
                        }

                        if let Some(extension) = statements.create_extension {
                            diesel::sql_query(sql::LOCK_EXTENSION).execute(conn).await?;
                            diesel::sql_query(extension).execute(conn).await?;
                        }
                        diesel::sql_query(statements.create_table.as_str())
                            .execute(conn)
                            .await?;
                        for index in &statements.create_indexes {
                            diesel::sql_query(index.as_str()).execute(conn).await?;
                        }
                        Ok(None)
                    }
                    .scope_boxed()
                })
                .await?;

            if let Some(columns) = existing {
                return self.check_columns(&columns);
            }

            tracing::info!(
                target: TRACING_TARGET_COLLECTION,
                collection = %self.table,
                indexes = self.statements.create_indexes.len(),
                "Collection table created"
            );
            Ok(())
        })
        .await
    }

    /// Inserts or replaces the record stored under `key`.
    ///
    /// Fields missing from `record` are stored as `NULL`.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::Mapping`] if the record does not fit the
    /// mapping and [`VectorError::Embedding`] if embedding its text fails.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table))]
    pub async fn upsert(&self, key: K, record: R, cancel: &CancellationToken) -> VectorResult<()> {
        let key = key.into_value();
        let record = record.into_dynamic();

        self.run(cancel, async move {
            self.mapping.validate_record(&key, &record)?;
            let mut embeddings = self.embed_records([&record]).await?;
            let query = self.bind_row(key, record, embeddings.pop().unwrap_or_default())?;

            let mut conn = self.handle.get_connection().await?;
            query.execute(&mut **conn).await?;
            Ok(())
        })
        .await
    }

    /// Upserts several records in one transaction.
    ///
    /// All records are validated and embedded before anything is written.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table))]
    pub async fn upsert_batch(
        &self,
        items: impl IntoIterator<Item = (K, R)>,
        cancel: &CancellationToken,
    ) -> VectorResult<()> {
        let items: Vec<(Value, DynamicRecord)> = items
            .into_iter()
            .map(|(key, record)| (key.into_value(), record.into_dynamic()))
            .collect();

        self.run(cancel, async move {
            if items.is_empty() {
                return Ok(());
            }
            for (key, record) in &items {
                self.mapping.validate_record(key, record)?;
            }

            let embeddings = self.embed_records(items.iter().map(|(_, record)| record)).await?;
            let queries = items
                .into_iter()
                .zip(embeddings)
                .map(|((key, record), embedded)| self.bind_row(key, record, embedded))
                .collect::<VectorResult<Vec<_>>>()?;
            let count = queries.len();

            let mut conn = self.handle.get_connection().await?;
            conn.transaction::<_, VectorError, _>(|conn| {
                async move {
                    for query in queries {
                        query.execute(conn).await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await?;

            tracing::debug!(
                target: TRACING_TARGET_COLLECTION,
                collection = %self.table,
                count,
                "Upserted batch"
            );
            Ok(())
        })
        .await
    }

    /// Fetches the record stored under `key`.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table))]
    pub async fn get(&self, key: K, cancel: &CancellationToken) -> VectorResult<Option<R>> {
        let key = key.into_value();

        self.run(cancel, async move {
            let query = bind_key(boxed(self.statements.select.as_str()), self.mapping.key(), key)?;

            let mut conn = self.handle.get_connection().await?;
            let row: Option<RecordRow> = query.get_result(&mut **conn).await.optional()?;

            row.map(|row| {
                let (_, record) = decode_record(&self.mapping, row.record)?;
                R::from_dynamic(record)
            })
            .transpose()
        })
        .await
    }

    /// Fetches the records stored under `keys`, in request order.
    ///
    /// Keys without a record are skipped.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table))]
    pub async fn get_batch(
        &self,
        keys: impl IntoIterator<Item = K>,
        cancel: &CancellationToken,
    ) -> VectorResult<Vec<(K, R)>> {
        let keys: Vec<Value> = keys.into_iter().map(RecordKey::into_value).collect();

        self.run(cancel, async move {
            if keys.is_empty() {
                return Ok(Vec::new());
            }

            let query = bind_keys(
                boxed(self.statements.select_batch.as_str()),
                self.mapping.key(),
                keys.clone(),
            )?;

            let mut conn = self.handle.get_connection().await?;
            let rows: Vec<RecordRow> = query.load(&mut **conn).await?;

            let mut found = rows
                .into_iter()
                .map(|row| decode_record(&self.mapping, row.record))
                .collect::<VectorResult<Vec<_>>>()?;

            let mut results = Vec::with_capacity(found.len());
            for key in keys {
                if let Some(position) = found.iter().position(|(found, _)| *found == key) {
                    let (key, record) = found.swap_remove(position);
                    results.push((K::from_value(key)?, R::from_dynamic(record)?));
                }
            }
            Ok(results)
        })
        .await
    }

    /// Deletes the record stored under `key`. Deleting a missing key is a no-op.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table))]
    pub async fn delete(&self, key: K, cancel: &CancellationToken) -> VectorResult<()> {
        let key = key.into_value();

        self.run(cancel, async move {
            let query = bind_key(boxed(self.statements.delete.as_str()), self.mapping.key(), key)?;

            let mut conn = self.handle.get_connection().await?;
            let deleted = query.execute(&mut **conn).await?;

            tracing::trace!(target: TRACING_TARGET_COLLECTION, deleted, "Deleted record");
            Ok(())
        })
        .await
    }

    /// Deletes the records stored under `keys` in one statement.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table))]
    pub async fn delete_batch(
        &self,
        keys: impl IntoIterator<Item = K>,
        cancel: &CancellationToken,
    ) -> VectorResult<()> {
        let keys: Vec<Value> = keys.into_iter().map(RecordKey::into_value).collect();

        self.run(cancel, async move {
            if keys.is_empty() {
                return Ok(());
            }

            let query = bind_keys(
                boxed(self.statements.delete_batch.as_str()),
                self.mapping.key(),
                keys,
            )?;

            let mut conn = self.handle.get_connection().await?;
            let deleted = query.execute(&mut **conn).await?;

            tracing::debug!(
                target: TRACING_TARGET_COLLECTION,
                collection = %self.table,
                deleted,
                "Deleted batch"
            );
            Ok(())
        })
        .await
    }

    /// Returns the records nearest to `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::InvalidArgument`] if `options.top` is zero, the
    /// vector field is unknown, the filter is invalid or `query` has the wrong
    /// number of dimensions.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table, top = options.top))]
    pub async fn search(
        &self,
        query: Vec<f32>,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> VectorResult<Vec<SearchResult<K, R>>> {
        self.run(cancel, async move {
            options.validate()?;
            let entry = self
                .mapping
                .resolve_vector_field(options.vector_field.as_deref())?;
            self.search_entry(entry, query, &options).await
        })
        .await
    }

    /// Embeds `text` and returns the records nearest to it.
    ///
    /// Searches the generated vector of an `embedded_text` field; the first
    /// such field unless `options.vector_field` names one.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table, top = options.top))]
    pub async fn search_text(
        &self,
        text: &str,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> VectorResult<Vec<SearchResult<K, R>>> {
        let text = text.to_owned();

        self.run(cancel, async move {
            options.validate()?;
            let entry = self
                .mapping
                .resolve_embedded_field(options.vector_field.as_deref())?;
            let generator = self.embedding_generator.as_deref().ok_or_else(|| {
                VectorError::invalid_argument("collection has no embedding generator")
            })?;
            let dimensions = entry.vector_options().map_or(0, |options| options.dimensions);

            let mut embeddings = generate_checked(generator, &[text], &[dimensions]).await?;
            let query = embeddings.pop().unwrap_or_default();
            self.search_entry(entry, query, &options).await
        })
        .await
    }

    /// Returns whether the backing table exists.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table))]
    pub async fn collection_exists(&self, cancel: &CancellationToken) -> VectorResult<bool> {
        self.run(cancel, async move {
            let mut conn = self.handle.get_connection().await?;
            let row: PresentRow = boxed(sql::TABLE_EXISTS)
                .bind::<Text, _>(self.table.qualified())
                .get_result(&mut **conn)
                .await?;
            Ok(row.present)
        })
        .await
    }

    /// Drops the backing table and its indexes. Dropping a missing table is a no-op.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(collection = %self.table))]
    pub async fn delete_collection(&self, cancel: &CancellationToken) -> VectorResult<()> {
        self.run(cancel, async move {
            let mut conn = self.handle.get_connection().await?;
            diesel::sql_query(self.statements.drop_table.as_str())
                .execute(&mut **conn)
                .await?;

            tracing::info!(
                target: TRACING_TARGET_COLLECTION,
                collection = %self.table,
                "Collection table dropped"
            );
            Ok(())
        })
        .await
    }

    /// Runs an operation unless the collection is disposed or `cancel` fires first.
    async fn run<T>(
        &self,
        cancel: &CancellationToken,
        operation: impl Future<Output = VectorResult<T>>,
    ) -> VectorResult<T> {
        if self.handle.is_released() {
            return Err(VectorError::use_after_dispose(self.table.to_string()));
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(
                    target: TRACING_TARGET_COLLECTION,
                    collection = %self.table,
                    "Operation cancelled"
                );
                Err(VectorError::Cancelled)
            }
            result = operation => result,
        };

        result.map_err(|err| match err {
            VectorError::Store(PgError::Released) if self.handle.is_released() => {
                VectorError::use_after_dispose(self.table.to_string())
            }
            err => err,
        })
    }

    async fn search_entry(
        &self,
        entry: &ColumnMapping,
        query: Vec<f32>,
        options: &SearchOptions,
    ) -> VectorResult<Vec<SearchResult<K, R>>> {
        let dimensions = entry.vector_options().map_or(0, |options| options.dimensions);
        if query.len() != dimensions {
            return Err(VectorError::invalid_argument(format!(
                "query has {} dimensions, field {} expects {dimensions}",
                query.len(),
                entry.field()
            )));
        }

        let filter = options
            .filter
            .as_ref()
            .map(|filter| render_filter(&self.mapping, filter, 2))
            .transpose()?;

        let sql = self
            .statements
            .search(entry, filter.as_ref(), options.top, options.skip);
        let mut statement = bind_vector(boxed(sql), query);
        if let Some(filter) = filter {
            for (entry, value) in filter.binds {
                statement = bind_value(statement, entry, value)?;
            }
        }

        let mut conn = self.handle.get_connection().await?;
        let rows: Vec<ScoredRecordRow> = statement.load(&mut **conn).await?;

        tracing::debug!(
            target: TRACING_TARGET_COLLECTION,
            collection = %self.table,
            field = entry.field(),
            results = rows.len(),
            "Search completed"
        );

        rows.into_iter()
            .map(|row| {
                let (key, record) = decode_record(&self.mapping, row.record)?;
                Ok(SearchResult {
                    key: K::from_value(key)?,
                    record: R::from_dynamic(record)?,
                    score: row.score,
                })
            })
            .collect()
    }

    /// Generates the embeddings of every `embedded_text` field, in one call.
    ///
    /// Returns one map per record from generated field to vector.
    async fn embed_records<'a>(
        &self,
        records: impl IntoIterator<Item = &'a DynamicRecord>,
    ) -> VectorResult<Vec<HashMap<String, Vec<f32>>>> {
        let mut targets = Vec::new();
        let mut inputs = Vec::new();
        let mut dimensions = Vec::new();
        let mut count = 0;

        for (index, record) in records.into_iter().enumerate() {
            count += 1;
            for (field, text, field_dimensions) in self.mapping.embedding_inputs(record) {
                targets.push((index, field.to_owned()));
                inputs.push(text.to_owned());
                dimensions.push(field_dimensions);
            }
        }

        let mut embedded = vec![HashMap::new(); count];
        let Some(generator) = self.embedding_generator.as_deref() else {
            return Ok(embedded);
        };

        let embeddings = generate_checked(generator, &inputs, &dimensions).await?;
        for ((index, field), embedding) in targets.into_iter().zip(embeddings) {
            embedded[index].insert(field, embedding);
        }
        Ok(embedded)
    }

    /// Binds one row of the upsert statement, in column order.
    fn bind_row(
        &self,
        mut key: Value,
        mut record: DynamicRecord,
        mut embedded: HashMap<String, Vec<f32>>,
    ) -> VectorResult<BoxedQuery> {
        let mut query = boxed(self.statements.upsert.as_str());
        for entry in self.mapping.entries() {
            let value = if entry.is_key() {
                std::mem::take(&mut key)
            } else if entry.is_generated() {
                embedded
                    .remove(entry.field())
                    .map(Value::Vector)
                    .unwrap_or_default()
            } else {
                record.take(entry.field()).unwrap_or_default()
            };
            query = bind_value(query, entry, value)?;
        }
        Ok(query)
    }

    fn check_columns(&self, columns: &[ColumnRow]) -> VectorResult<()> {
        for entry in self.mapping.entries() {
            let expected = sql::reported_column_type(entry);
            let Some(column) = columns.iter().find(|column| column.column_name == entry.column())
            else {
                return Err(VectorError::schema_mismatch(
                    self.table.to_string(),
                    format!("column {} is missing", entry.column()),
                ));
            };

            if !column.column_type.eq_ignore_ascii_case(&expected) {
                return Err(VectorError::schema_mismatch(
                    self.table.to_string(),
                    format!(
                        "column {} has type {}, expected {expected}",
                        entry.column(),
                        column.column_type
                    ),
                ));
            }

            if entry.is_key() && !column.is_unique {
                return Err(VectorError::schema_mismatch(
                    self.table.to_string(),
                    format!("key column {} has no unique index", entry.column()),
                ));
            }
        }

        tracing::debug!(
            target: TRACING_TARGET_COLLECTION,
            collection = %self.table,
            columns = columns.len(),
            "Existing table matches mapping"
        );
        Ok(())
    }
}

impl<K: RecordKey, R: Record> fmt::Debug for Collection<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("table", &self.table)
            .field("key_field", &self.mapping.key_field())
            .field("state", &self.state())
            .field("connection", &self.handle)
            .finish()
    }
}
