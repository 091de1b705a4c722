//! Result rows and decoding of JSON row objects.

use diesel::QueryableByName;
use diesel::sql_types::{Bool, Double, Jsonb, Text};
use serde_json::Value as Json;

use crate::error::{VectorError, VectorResult};
use crate::mapping::{ColumnMapping, RecordMapping};
use crate::record::{DynamicRecord, Value};
use crate::schema::StorageType;

#[derive(Debug, QueryableByName)]
pub(crate) struct RecordRow {
    #[diesel(sql_type = Jsonb)]
    pub record: Json,
}

#[derive(Debug, QueryableByName)]
pub(crate) struct ScoredRecordRow {
    #[diesel(sql_type = Jsonb)]
    pub record: Json,
    #[diesel(sql_type = Double)]
    pub score: f64,
}

#[derive(Debug, QueryableByName)]
pub(crate) struct ColumnRow {
    #[diesel(sql_type = Text)]
    pub column_name: String,
    #[diesel(sql_type = Text)]
    pub column_type: String,
    #[diesel(sql_type = Bool)]
    pub is_unique: bool,
}

#[derive(Debug, QueryableByName)]
pub(crate) struct PresentRow {
    #[diesel(sql_type = Bool)]
    pub present: bool,
}

#[derive(Debug, QueryableByName)]
pub(crate) struct TableNameRow {
    #[diesel(sql_type = Text)]
    pub table_name: String,
}

/// Splits a fetched row object into its key and record.
///
/// Keys that are not mapped record fields are ignored, as are `NULL` columns.
pub(crate) fn decode_record(
    mapping: &RecordMapping,
    row: Json,
) -> VectorResult<(Value, DynamicRecord)> {
    let Json::Object(mut object) = row else {
        return Err(VectorError::serialization("row is not a JSON object"));
    };

    let key_entry = mapping.key();
    let key = match object.remove(key_entry.field()) {
        Some(json) => decode_value(key_entry, json)?,
        None => Value::Null,
    };
    if key.is_null() {
        return Err(VectorError::serialization(format!(
            "row has no value for key field {}",
            key_entry.field()
        )));
    }

    let mut record = DynamicRecord::new();
    for entry in mapping.record_fields() {
        let Some(json) = object.remove(entry.field()) else {
            continue;
        };
        let value = decode_value(entry, json)?;
        if !value.is_null() {
            record.set(entry.field(), value);
        }
    }

    Ok((key, record))
}

fn decode_value(entry: &ColumnMapping, json: Json) -> VectorResult<Value> {
    let value = match (entry.storage_type(), json) {
        (_, Json::Null) => Value::Null,
        (StorageType::Text | StorageType::EmbeddedText | StorageType::Uuid, Json::String(text)) => {
            Value::Text(text)
        }
        (StorageType::Integer, Json::Number(number)) => match number.as_i64() {
            Some(number) => Value::Integer(number),
            None => return Err(malformed(entry, &number.to_string())),
        },
        (StorageType::Float, Json::Number(number)) => match number.as_f64() {
            Some(number) => Value::Float(number),
            None => return Err(malformed(entry, &number.to_string())),
        },
        // Non-finite doubles are rendered as strings.
        (StorageType::Float, Json::String(text)) => match text.parse() {
            Ok(number) => Value::Float(number),
            Err(_) => return Err(malformed(entry, &text)),
        },
        (StorageType::Boolean, Json::Bool(flag)) => Value::Boolean(flag),
        (StorageType::Bytes, Json::String(text)) => match hex::decode(&text) {
            Ok(bytes) => Value::Bytes(bytes),
            Err(_) => return Err(malformed(entry, &text)),
        },
        (StorageType::Vector, Json::Array(items)) => {
            let vector: Option<Vec<f32>> = items
                .iter()
                .map(|item| item.as_f64().map(|component| component as f32))
                .collect();
            match vector {
                Some(vector) => Value::Vector(vector),
                None => return Err(malformed(entry, "non-numeric vector component")),
            }
        }
        (_, other) => return Err(malformed(entry, &other.to_string())),
    };

    Ok(value)
}

fn malformed(entry: &ColumnMapping, found: &str) -> VectorError {
    VectorError::serialization(format!(
        "column {} of type {} holds unexpected value {found}",
        entry.column(),
        entry.storage_type()
    ))
}
