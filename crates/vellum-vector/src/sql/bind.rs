//! Typed parameter binding driven by the column's storage type.

use diesel::pg::Pg;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{Array, BigInt, Binary, Bool, Double, Nullable, Text, Uuid};
use pgvector::sql_types::Vector;

use crate::error::{VectorError, VectorResult};
use crate::mapping::ColumnMapping;
use crate::record::Value;
use crate::schema::StorageType;

/// Raw SQL query with parameters bound at runtime.
pub(crate) type BoxedQuery = BoxedSqlQuery<'static, Pg, SqlQuery>;

/// Starts a query whose parameters are bound one by one.
pub(crate) fn boxed(sql: impl Into<String>) -> BoxedQuery {
    diesel::sql_query(sql).into_boxed()
}

/// Binds a field value as the next parameter, typed by the column.
///
/// `Null` binds a typed SQL `NULL`.
pub(crate) fn bind_value(
    query: BoxedQuery,
    entry: &ColumnMapping,
    value: Value,
) -> VectorResult<BoxedQuery> {
    let query = match (entry.storage_type(), value) {
        (StorageType::Text | StorageType::EmbeddedText, Value::Null) => {
            query.bind::<Nullable<Text>, _>(None::<String>)
        }
        (StorageType::Integer, Value::Null) => query.bind::<Nullable<BigInt>, _>(None::<i64>),
        (StorageType::Float, Value::Null) => query.bind::<Nullable<Double>, _>(None::<f64>),
        (StorageType::Boolean, Value::Null) => query.bind::<Nullable<Bool>, _>(None::<bool>),
        (StorageType::Bytes, Value::Null) => query.bind::<Nullable<Binary>, _>(None::<Vec<u8>>),
        (StorageType::Uuid, Value::Null) => {
            query.bind::<Nullable<Uuid>, _>(None::<uuid::Uuid>)
        }
        (StorageType::Vector, Value::Null) => {
            query.bind::<Nullable<Vector>, _>(None::<pgvector::Vector>)
        }

        (StorageType::Text | StorageType::EmbeddedText, Value::Text(text)) => {
            query.bind::<Text, _>(text)
        }
        (StorageType::Integer, Value::Integer(number)) => query.bind::<BigInt, _>(number),
        (StorageType::Float, Value::Float(number)) => query.bind::<Double, _>(number),
        (StorageType::Boolean, Value::Boolean(flag)) => query.bind::<Bool, _>(flag),
        (StorageType::Bytes, Value::Bytes(bytes)) => query.bind::<Binary, _>(bytes),
        (StorageType::Uuid, Value::Text(text)) => query.bind::<Uuid, _>(parse_uuid(entry, &text)?),
        (StorageType::Vector, Value::Vector(vector)) => bind_vector(query, vector),

        (storage_type, value) => {
            return Err(VectorError::mapping(format!(
                "field {} of type {storage_type} cannot hold a {} value",
                entry.field(),
                value.kind()
            )));
        }
    };

    Ok(query)
}

/// Binds a key value; keys are never `NULL`.
pub(crate) fn bind_key(
    query: BoxedQuery,
    entry: &ColumnMapping,
    key: Value,
) -> VectorResult<BoxedQuery> {
    if key.is_null() {
        return Err(VectorError::mapping(format!(
            "key field {} cannot be null",
            entry.field()
        )));
    }
    bind_value(query, entry, key)
}

/// Binds a list of keys as one array parameter, for `= ANY($n)`.
pub(crate) fn bind_keys(
    query: BoxedQuery,
    entry: &ColumnMapping,
    keys: Vec<Value>,
) -> VectorResult<BoxedQuery> {
    let mismatch = |value: &Value| {
        VectorError::mapping(format!(
            "key field {} of type {} cannot hold a {} value",
            entry.field(),
            entry.storage_type(),
            value.kind()
        ))
    };

    let query = match entry.storage_type() {
        StorageType::Text => {
            let keys = keys
                .into_iter()
                .map(|key| match key {
                    Value::Text(text) => Ok(text),
                    other => Err(mismatch(&other)),
                })
                .collect::<VectorResult<Vec<_>>>()?;
            query.bind::<Array<Text>, _>(keys)
        }
        StorageType::Integer => {
            let keys = keys
                .into_iter()
                .map(|key| key.as_i64().ok_or_else(|| mismatch(&key)))
                .collect::<VectorResult<Vec<_>>>()?;
            query.bind::<Array<BigInt>, _>(keys)
        }
        StorageType::Uuid => {
            let keys = keys
                .into_iter()
                .map(|key| match &key {
                    Value::Text(text) => parse_uuid(entry, text),
                    other => Err(mismatch(other)),
                })
                .collect::<VectorResult<Vec<_>>>()?;
            query.bind::<Array<Uuid>, _>(keys)
        }
        other => {
            return Err(VectorError::schema(format!(
                "key field {} has unsupported type {other}",
                entry.field()
            )));
        }
    };

    Ok(query)
}

/// Binds a query or embedding vector.
pub(crate) fn bind_vector(query: BoxedQuery, vector: Vec<f32>) -> BoxedQuery {
    query.bind::<Vector, _>(pgvector::Vector::from(vector))
}

fn parse_uuid(entry: &ColumnMapping, text: &str) -> VectorResult<uuid::Uuid> {
    uuid::Uuid::parse_str(text).map_err(|err| {
        VectorError::mapping(format!("field {} holds an invalid uuid: {err}", entry.field()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{ModelBuilder, RecordMapping};
    use crate::schema::{DistanceFunction, FieldDefinition, SchemaDefinition};

    fn mapping() -> RecordMapping {
        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Uuid))
            .with_field(FieldDefinition::data("rating", StorageType::Float))
            .with_field(FieldDefinition::vector("v", 2, DistanceFunction::Cosine));
        ModelBuilder::build(Some(&definition), None).unwrap()
    }

    #[test]
    fn test_bind_accepts_matching_values() {
        let mapping = mapping();
        let rating = mapping.get("rating").unwrap();

        let query = boxed("SELECT $1, $2, $3");
        let query = bind_value(query, rating, Value::Float(3.0)).unwrap();
        let query = bind_value(query, rating, Value::Null).unwrap();
        bind_value(query, mapping.get("v").unwrap(), Value::Vector(vec![1.0, 0.0])).unwrap();
    }

    #[test]
    fn test_bind_rejects_mismatched_values() {
        let mapping = mapping();

        let err = bind_value(boxed("SELECT $1"), mapping.get("rating").unwrap(), "x".into())
            .err().unwrap();
        assert!(matches!(err, VectorError::Mapping(_)));

        let rating = mapping.get("rating").unwrap();
        let err = bind_value(boxed("SELECT $1"), rating, Value::Integer(3)).err().unwrap();
        assert!(matches!(err, VectorError::Mapping(_)));

        assert!(bind_key(boxed("SELECT $1"), mapping.key(), Value::Null).is_err());
        assert!(bind_key(boxed("SELECT $1"), mapping.key(), "not-a-uuid".into()).is_err());
    }

    #[test]
    fn test_bind_keys_checks_every_key() {
        let mapping = mapping();
        let id = uuid::Uuid::new_v4();

        assert!(bind_keys(boxed("SELECT $1"), mapping.key(), vec![Value::from(id)]).is_ok());
        assert!(
            bind_keys(
                boxed("SELECT $1"),
                mapping.key(),
                vec![Value::from(id), Value::Integer(1)]
            )
            .is_err()
        );
    }
}
