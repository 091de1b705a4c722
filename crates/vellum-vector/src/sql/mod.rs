//! SQL text generation for collection tables.
//!
//! Every identifier is quoted and every value is bound, so table, column and
//! field names may contain arbitrary characters. Statements that do not depend
//! on call arguments are rendered once per collection into [`Statements`].

mod bind;
mod filter;
mod row;

use std::fmt;

pub(crate) use bind::{BoxedQuery, bind_key, bind_keys, bind_value, bind_vector, boxed};
pub(crate) use filter::{FilterSql, render_filter};
pub(crate) use row::{
    ColumnRow, PresentRow, RecordRow, ScoredRecordRow, TableNameRow, decode_record,
};

use crate::error::{VectorError, VectorResult};
use crate::mapping::{ColumnMapping, RecordMapping};
use crate::schema::{IndexKind, StorageType};

/// PostgreSQL truncates identifiers longer than this many bytes.
pub(crate) const MAX_IDENTIFIER_LEN: usize = 63;

/// `jsonb_build_object` accepts at most 100 arguments.
const MAX_OBJECT_PAIRS: usize = 50;

/// Schema used when a collection does not name one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Checks that a name can be used as a PostgreSQL identifier.
pub(crate) fn check_identifier(what: &str, name: &str) -> VectorResult<()> {
    if name.is_empty() {
        return Err(VectorError::schema(format!("{what} name cannot be empty")));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(VectorError::schema(format!(
            "{what} name {name} exceeds {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if name.contains('\0') {
        return Err(VectorError::schema(format!(
            "{what} name {name:?} contains a NUL character"
        )));
    }
    Ok(())
}

/// Quotes an identifier, doubling embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal, doubling embedded single quotes.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Schema-qualified name of a collection table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    schema: String,
    name: String,
}

impl TableRef {
    /// Creates a table reference, validating both identifiers.
    pub fn new(schema: Option<&str>, name: &str) -> VectorResult<Self> {
        let schema = schema.unwrap_or(DEFAULT_SCHEMA);
        check_identifier("schema", schema)?;
        check_identifier("collection", name)?;

        Ok(Self {
            schema: schema.to_owned(),
            name: name.to_owned(),
        })
    }

    #[inline]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the quoted, schema-qualified name.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Type name used in `CREATE TABLE`.
fn column_definition_type(entry: &ColumnMapping) -> String {
    match entry.storage_type() {
        StorageType::Text | StorageType::EmbeddedText => "TEXT".to_owned(),
        StorageType::Integer => "BIGINT".to_owned(),
        StorageType::Float => "DOUBLE PRECISION".to_owned(),
        StorageType::Boolean => "BOOLEAN".to_owned(),
        StorageType::Bytes => "BYTEA".to_owned(),
        StorageType::Uuid => "UUID".to_owned(),
        StorageType::Vector => format!("VECTOR({})", vector_dimensions(entry)),
    }
}

/// Type name as reported by `format_type`.
pub(crate) fn reported_column_type(entry: &ColumnMapping) -> String {
    match entry.storage_type() {
        StorageType::Text | StorageType::EmbeddedText => "text".to_owned(),
        StorageType::Integer => "bigint".to_owned(),
        StorageType::Float => "double precision".to_owned(),
        StorageType::Boolean => "boolean".to_owned(),
        StorageType::Bytes => "bytea".to_owned(),
        StorageType::Uuid => "uuid".to_owned(),
        StorageType::Vector => format!("vector({})", vector_dimensions(entry)),
    }
}

fn vector_dimensions(entry: &ColumnMapping) -> usize {
    entry.vector_options().map_or(0, |options| options.dimensions)
}

/// Expression placing a column into the JSON row object.
fn read_expression(entry: &ColumnMapping) -> String {
    let column = quote_ident(entry.column());
    match entry.storage_type() {
        StorageType::Vector => format!("{column}::real[]"),
        StorageType::Bytes => format!("encode({column}, 'hex')"),
        _ => column,
    }
}

/// Builds the JSON object holding the key and every record field of a row.
fn projection(mapping: &RecordMapping) -> String {
    let pairs: Vec<String> = mapping
        .entries()
        .filter(|entry| !entry.is_generated())
        .map(|entry| format!("{}, {}", quote_literal(entry.field()), read_expression(entry)))
        .collect();

    let objects: Vec<String> = pairs
        .chunks(MAX_OBJECT_PAIRS)
        .map(|chunk| format!("jsonb_build_object({})", chunk.join(", ")))
        .collect();

    format!("({})", objects.join(" || "))
}

/// SQL statements of one collection.
#[derive(Debug, Clone)]
pub(crate) struct Statements {
    pub create_extension: Option<&'static str>,
    pub create_table: String,
    pub create_indexes: Vec<String>,
    pub upsert: String,
    pub select: String,
    pub select_batch: String,
    pub delete: String,
    pub delete_batch: String,
    pub drop_table: String,
    /// JSON row expression, reused by searches.
    projection: String,
    table: String,
}

/// Checks whether a relation exists. `$1` is the qualified table name.
pub(crate) const TABLE_EXISTS: &str = "SELECT to_regclass($1) IS NOT NULL AS present";

/// Lists the columns of a relation. `$1` is the qualified table name.
///
/// `is_unique` is set when an immediate, non-partial unique index covers the
/// column alone, which is what `ON CONFLICT` needs as an arbiter.
pub(crate) const INSPECT_COLUMNS: &str = "SELECT a.attname::text AS column_name, \
     format_type(a.atttypid, a.atttypmod) AS column_type, \
     EXISTS (SELECT 1 FROM pg_catalog.pg_index i \
         WHERE i.indrelid = a.attrelid AND i.indisunique AND i.indimmediate \
         AND i.indnkeyatts = 1 AND i.indkey[0] = a.attnum AND i.indpred IS NULL) AS is_unique \
     FROM pg_catalog.pg_attribute a \
     WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped \
     ORDER BY a.attnum";

/// Serializes table creation on one qualified name until the transaction ends.
pub(crate) const LOCK_TABLE: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

/// Serializes `CREATE EXTENSION` across collections until the transaction ends.
pub(crate) const LOCK_EXTENSION: &str =
    "SELECT pg_advisory_xact_lock(hashtext('vellum_vector.create_extension'))";

/// Lists the base tables of a schema. `$1` is the schema name.
pub(crate) const LIST_TABLES: &str = "SELECT table_name::text AS table_name \
     FROM information_schema.tables \
     WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

impl Statements {
    /// Renders the statements for a table laid out by `mapping`.
    pub fn new(table: &TableRef, mapping: &RecordMapping) -> Self {
        let qualified = table.qualified();
        let key = quote_ident(mapping.key().column());

        let columns: Vec<String> = mapping
            .entries()
            .map(|entry| {
                let mut definition =
                    format!("{} {}", quote_ident(entry.column()), column_definition_type(entry));
                if entry.is_key() {
                    definition.push_str(" PRIMARY KEY");
                }
                definition
            })
            .collect();

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {qualified} ({})",
            columns.join(", ")
        );

        let create_indexes = mapping
            .entries()
            .filter_map(|entry| {
                let options = entry.vector_options()?;
                let (method, parameters) = match options.index_kind {
                    IndexKind::Hnsw => ("hnsw", "m = 16, ef_construction = 64"),
                    IndexKind::IvfFlat => ("ivfflat", "lists = 100"),
                    IndexKind::Flat => return None,
                };
                let index = quote_ident(&format!("{}_{}_idx", table.name(), entry.column()));
                Some(format!(
                    "CREATE INDEX IF NOT EXISTS {index} ON {qualified} USING {method} ({} {}) WITH ({parameters})",
                    quote_ident(entry.column()),
                    options.distance_function.operator_class()
                ))
            })
            .collect();

        let names: Vec<String> = mapping
            .entries()
            .map(|entry| quote_ident(entry.column()))
            .collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|n| format!("${n}")).collect();
        let updates: Vec<String> = mapping
            .entries()
            .filter(|entry| !entry.is_key())
            .map(|entry| {
                let column = quote_ident(entry.column());
                format!("{column} = EXCLUDED.{column}")
            })
            .collect();
        let conflict = if updates.is_empty() {
            "DO NOTHING".to_owned()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let upsert = format!(
            "INSERT INTO {qualified} ({}) VALUES ({}) ON CONFLICT ({key}) {conflict}",
            names.join(", "),
            placeholders.join(", ")
        );

        let projection = projection(mapping);

        Self {
            create_extension: mapping
                .has_vectors()
                .then_some("CREATE EXTENSION IF NOT EXISTS vector"),
            create_table,
            create_indexes,
            upsert,
            select: format!("SELECT {projection} AS record FROM {qualified} WHERE {key} = $1"),
            select_batch: format!(
                "SELECT {projection} AS record FROM {qualified} WHERE {key} = ANY($1)"
            ),
            delete: format!("DELETE FROM {qualified} WHERE {key} = $1"),
            delete_batch: format!("DELETE FROM {qualified} WHERE {key} = ANY($1)"),
            drop_table: format!("DROP TABLE IF EXISTS {qualified}"),
            projection,
            table: qualified,
        }
    }

    /// Renders a nearest-neighbour query over `entry`.
    ///
    /// `$1` is the query vector; filter parameters start at `$2`.
    pub fn search(
        &self,
        entry: &ColumnMapping,
        filter: Option<&FilterSql<'_>>,
        top: usize,
        skip: usize,
    ) -> String {
        let column = quote_ident(entry.column());
        let distance_function = entry
            .vector_options()
            .map(|options| options.distance_function)
            .unwrap_or_default();
        let distance = format!("{column} {} $1", distance_function.operator());
        let score = distance_function.score_expression(&distance);

        let mut predicate = format!("{column} IS NOT NULL");
        if let Some(filter) = filter {
            predicate.push_str(" AND (");
            predicate.push_str(&filter.sql);
            predicate.push(')');
        }

        format!(
            "SELECT {} AS record, {score} AS score FROM {} WHERE {predicate} \
             ORDER BY {distance} LIMIT {top} OFFSET {skip}",
            self.projection, self.table
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ModelBuilder;
    use crate::schema::{DistanceFunction, FieldDefinition, SchemaDefinition};

    fn books() -> RecordMapping {
        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::data("title", StorageType::Text))
            .with_field(FieldDefinition::data("cover", StorageType::Bytes))
            .with_field(FieldDefinition::vector(
                "embedding",
                3,
                DistanceFunction::Cosine,
            ));
        ModelBuilder::build(Some(&definition), None).unwrap()
    }

    fn table() -> TableRef {
        TableRef::new(None, "books").unwrap()
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("books"), "\"books\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_table_ref() {
        let table = table();
        assert_eq!(table.schema(), DEFAULT_SCHEMA);
        assert_eq!(table.qualified(), "\"public\".\"books\"");
        assert_eq!(table.to_string(), "public.books");

        assert!(TableRef::new(None, "").is_err());
        assert!(TableRef::new(Some(""), "books").is_err());
        assert!(TableRef::new(None, &"t".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn test_create_table() {
        let statements = Statements::new(&table(), &books());
        assert_eq!(
            statements.create_table,
            "CREATE TABLE IF NOT EXISTS \"public\".\"books\" (\"id\" TEXT PRIMARY KEY, \
             \"title\" TEXT, \"cover\" BYTEA, \"embedding\" VECTOR(3))"
        );
        assert_eq!(
            statements.create_extension,
            Some("CREATE EXTENSION IF NOT EXISTS vector")
        );
    }

    #[test]
    fn test_create_indexes() {
        let statements = Statements::new(&table(), &books());
        assert_eq!(
            statements.create_indexes,
            ["CREATE INDEX IF NOT EXISTS \"books_embedding_idx\" ON \"public\".\"books\" \
              USING hnsw (\"embedding\" vector_cosine_ops) WITH (m = 16, ef_construction = 64)"]
        );

        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Integer))
            .with_field(
                FieldDefinition::vector("a", 2, DistanceFunction::Euclidean)
                    .with_index_kind(IndexKind::IvfFlat),
            )
            .with_field(
                FieldDefinition::vector("b", 2, DistanceFunction::Cosine)
                    .with_index_kind(IndexKind::Flat),
            );
        let mapping = ModelBuilder::build(Some(&definition), None).unwrap();
        let statements = Statements::new(&table(), &mapping);
        assert_eq!(statements.create_indexes.len(), 1);
        assert!(statements.create_indexes[0].contains("USING ivfflat (\"a\" vector_l2_ops)"));
        assert!(statements.create_indexes[0].ends_with("WITH (lists = 100)"));
    }

    #[test]
    fn test_upsert() {
        let statements = Statements::new(&table(), &books());
        assert_eq!(
            statements.upsert,
            "INSERT INTO \"public\".\"books\" (\"id\", \"title\", \"cover\", \"embedding\") \
             VALUES ($1, $2, $3, $4) ON CONFLICT (\"id\") DO UPDATE SET \
             \"title\" = EXCLUDED.\"title\", \"cover\" = EXCLUDED.\"cover\", \
             \"embedding\" = EXCLUDED.\"embedding\""
        );
    }

    #[test]
    fn test_key_only_upsert_does_nothing_on_conflict() {
        let definition =
            SchemaDefinition::new().with_field(FieldDefinition::key("id", StorageType::Uuid));
        let mapping = ModelBuilder::build(Some(&definition), None).unwrap();
        let statements = Statements::new(&table(), &mapping);

        assert!(statements.upsert.ends_with("ON CONFLICT (\"id\") DO NOTHING"));
        assert!(statements.create_extension.is_none());
    }

    #[test]
    fn test_select_projection() {
        let statements = Statements::new(&table(), &books());
        assert_eq!(
            statements.select,
            "SELECT (jsonb_build_object('id', \"id\", 'title', \"title\", \
             'cover', encode(\"cover\", 'hex'), 'embedding', \"embedding\"::real[])) \
             AS record FROM \"public\".\"books\" WHERE \"id\" = $1"
        );
        assert!(statements.select_batch.ends_with("WHERE \"id\" = ANY($1)"));
        assert_eq!(
            statements.delete,
            "DELETE FROM \"public\".\"books\" WHERE \"id\" = $1"
        );
    }

    #[test]
    fn test_wide_projection_is_chunked() {
        let definition = (0..120)
            .map(|i| FieldDefinition::data(format!("f{i}"), StorageType::Integer))
            .chain(std::iter::once(FieldDefinition::key("id", StorageType::Text)))
            .collect::<SchemaDefinition>();
        let mapping = ModelBuilder::build(Some(&definition), None).unwrap();
        let statements = Statements::new(&table(), &mapping);

        assert_eq!(statements.select.matches("jsonb_build_object(").count(), 3);
        assert_eq!(statements.select.matches(" || ").count(), 2);
    }

    #[test]
    fn test_search_statement() {
        let mapping = books();
        let statements = Statements::new(&table(), &mapping);
        let entry = mapping.resolve_vector_field(None).unwrap();

        let sql = statements.search(entry, None, 5, 10);
        assert!(sql.contains("(1 - (\"embedding\" <=> $1))::float8 AS score"));
        assert!(sql.contains("WHERE \"embedding\" IS NOT NULL ORDER BY \"embedding\" <=> $1"));
        assert!(sql.ends_with("LIMIT 5 OFFSET 10"));
    }

    #[test]
    fn test_mapped_column_names_are_used() {
        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text).with_column_name("book_id"))
            .with_field(FieldDefinition::data("title", StorageType::Text).with_column_name("t"));
        let mapping = ModelBuilder::build(Some(&definition), None).unwrap();
        let statements = Statements::new(&table(), &mapping);

        assert!(statements.select.contains("'title', \"t\""));
        assert!(statements.delete.ends_with("WHERE \"book_id\" = $1"));
    }
}
