//! Record and key representations accepted by collections.

mod dynamic;
mod value;

use std::fmt;

pub use dynamic::DynamicRecord;
pub use value::{Value, ValueKind};

use crate::error::{VectorError, VectorResult};
use crate::schema::{SchemaDefinition, StorageType};

/// A record type that a collection can store.
///
/// Records travel through the mapping layer as [`DynamicRecord`]s. Statically
/// typed records convert to and from that form and may describe their own
/// schema; [`DynamicRecord`] itself has none, so dynamic collections must be
/// given an explicit [`SchemaDefinition`].
pub trait Record: Sized + Send + Sync + 'static {
    /// Schema used when the caller supplies none.
    fn definition() -> Option<SchemaDefinition> {
        None
    }

    /// Converts the record into its field map. The key is passed separately.
    fn into_dynamic(self) -> DynamicRecord;

    /// Rebuilds the record from a fetched field map.
    fn from_dynamic(record: DynamicRecord) -> VectorResult<Self>;
}

impl Record for DynamicRecord {
    #[inline]
    fn into_dynamic(self) -> DynamicRecord {
        self
    }

    #[inline]
    fn from_dynamic(record: DynamicRecord) -> VectorResult<Self> {
        Ok(record)
    }
}

/// A key type that a collection can be addressed by.
pub trait RecordKey: Clone + fmt::Debug + Send + Sync + 'static {
    /// Storage type the key field must be declared with.
    const STORAGE_TYPE: StorageType;

    /// Converts the key into a field value.
    fn into_value(self) -> Value;

    /// Rebuilds the key from a fetched value.
    fn from_value(value: Value) -> VectorResult<Self>;
}

impl RecordKey for String {
    const STORAGE_TYPE: StorageType = StorageType::Text;

    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn from_value(value: Value) -> VectorResult<Self> {
        match value {
            Value::Text(text) => Ok(text),
            other => Err(unexpected_key(StorageType::Text, &other)),
        }
    }
}

impl RecordKey for i64 {
    const STORAGE_TYPE: StorageType = StorageType::Integer;

    fn into_value(self) -> Value {
        Value::Integer(self)
    }

    fn from_value(value: Value) -> VectorResult<Self> {
        match value {
            Value::Integer(number) => Ok(number),
            other => Err(unexpected_key(StorageType::Integer, &other)),
        }
    }
}

impl RecordKey for uuid::Uuid {
    const STORAGE_TYPE: StorageType = StorageType::Uuid;

    fn into_value(self) -> Value {
        Value::from(self)
    }

    fn from_value(value: Value) -> VectorResult<Self> {
        match &value {
            Value::Text(text) => uuid::Uuid::parse_str(text)
                .map_err(|err| VectorError::serialization(format!("invalid uuid key: {err}"))),
            other => Err(unexpected_key(StorageType::Uuid, other)),
        }
    }
}

fn unexpected_key(expected: StorageType, value: &Value) -> VectorError {
    VectorError::serialization(format!(
        "expected {expected} key, found {} value",
        value.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_key_round_trip() {
        let value = "a".to_string().into_value();
        assert_eq!(String::from_value(value).unwrap(), "a");
        assert!(String::from_value(Value::Integer(1)).is_err());
    }

    #[test]
    fn test_uuid_key_round_trip() {
        let id = uuid::Uuid::new_v4();
        let value = id.into_value();
        assert!(matches!(value, Value::Text(_)));
        assert_eq!(uuid::Uuid::from_value(value).unwrap(), id);
        assert!(uuid::Uuid::from_value(Value::from("not-a-uuid")).is_err());
    }

    #[test]
    fn test_dynamic_record_has_no_definition() {
        assert!(<DynamicRecord as Record>::definition().is_none());
    }
}
