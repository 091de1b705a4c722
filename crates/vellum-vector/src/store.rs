//! Entry point handing out collections over one shared data source.

use diesel::sql_types::Text;
use diesel_async::RunQueryDsl;
use tokio_util::sync::CancellationToken;
use vellum_postgres::{ConnectionHandle, PgClient, PgConfig};

use crate::TRACING_TARGET_COLLECTION;
use crate::collection::{Collection, CollectionOptions, DynamicCollection};
use crate::error::{VectorError, VectorResult};
use crate::record::{Record, RecordKey};
use crate::schema::SchemaDefinition;
use crate::sql::{self, TableNameRow, boxed, check_identifier};

/// Owns one connection reference and shares it with every collection it creates.
///
/// Collections created by the store stay usable after the store is disposed;
/// the pool closes once the store and all of its collections are released.
#[derive(Debug)]
pub struct VectorStore {
    handle: ConnectionHandle,
    schema: String,
}

impl VectorStore {
    /// Connects to a new pool owned by the store.
    pub fn connect(config: PgConfig) -> VectorResult<Self> {
        let client = config.build()?;
        Ok(Self::from_client(client, true))
    }

    /// Wraps an existing data source; `owns_resource` decides who closes it.
    pub fn from_client(client: PgClient, owns_resource: bool) -> Self {
        tracing::info!(
            target: TRACING_TARGET_COLLECTION,
            owns_resource,
            "Vector store initialized"
        );

        Self {
            handle: ConnectionHandle::acquire(client, owns_resource),
            schema: sql::DEFAULT_SCHEMA.to_owned(),
        }
    }

    /// Sets the schema used by collections that do not name one.
    pub fn with_schema(mut self, schema: impl Into<String>) -> VectorResult<Self> {
        let schema = schema.into();
        check_identifier("schema", &schema)?;
        self.schema = schema;
        Ok(self)
    }

    /// Returns the default schema.
    #[inline]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the store's connection reference.
    #[inline]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Returns whether [`VectorStore::dispose`] was called.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.handle.is_released()
    }

    /// Creates a collection sharing the store's data source.
    pub fn collection<K: RecordKey, R: Record>(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> VectorResult<Collection<K, R>> {
        if self.is_disposed() {
            return Err(VectorError::use_after_dispose(name));
        }

        let options = CollectionOptions {
            schema: options.schema.or_else(|| Some(self.schema.clone())),
            ..options
        };
        Collection::from_handle(&self.handle, name, options)
    }

    /// Creates a collection of dynamic records with an explicit definition.
    pub fn dynamic_collection<K: RecordKey>(
        &self,
        name: &str,
        definition: SchemaDefinition,
        options: CollectionOptions,
    ) -> VectorResult<DynamicCollection<K>> {
        self.collection(name, options.with_definition(definition))
    }

    /// Lists the tables of the default schema.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_COLLECTION, fields(schema = %self.schema))]
    pub async fn list_collection_names(
        &self,
        cancel: &CancellationToken,
    ) -> VectorResult<Vec<String>> {
        if self.is_disposed() {
            return Err(VectorError::use_after_dispose(self.schema.clone()));
        }

        let list = async {
            let mut conn = self.handle.get_connection().await?;
            let rows: Vec<TableNameRow> = boxed(sql::LIST_TABLES)
                .bind::<Text, _>(self.schema.clone())
                .load(&mut **conn)
                .await?;
            Ok::<_, VectorError>(rows.into_iter().map(|row| row.table_name).collect())
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(VectorError::Cancelled),
            names = list => names,
        }
    }

    /// Releases the store's reference. Later calls are no-ops.
    pub fn dispose(&self) {
        if self.handle.is_released() {
            return;
        }
        self.handle.release();
        tracing::debug!(
            target: TRACING_TARGET_COLLECTION,
            share_count = self.handle.share_count(),
            "Vector store disposed"
        );
    }
}
