use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::dao::{
    backend::Row,
    storage::{StorageError, StorageResult},
};

/// Serialise an entity into a table row.
pub(crate) fn to_row<T: Serialize>(table: &str, value: &T) -> StorageResult<Row> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(StorageError::rejected(format!(
            "{table}: expected an object row, got {other}"
        ))),
        Err(source) => Err(StorageError::unavailable(
            format!("{table}: failed to encode row"),
            source,
        )),
    }
}

/// Decode rows returned by the table store.
pub(crate) fn from_rows<T: DeserializeOwned>(table: &str, rows: Vec<Row>) -> StorageResult<Vec<T>> {
    rows.into_iter().map(|row| from_row(table, row)).collect()
}

pub(crate) fn from_row<T: DeserializeOwned>(table: &str, row: Row) -> StorageResult<T> {
    serde_json::from_value(Value::Object(row))
        .map_err(|source| StorageError::unavailable(format!("{table}: failed to decode row"), source))
}

/// Single-column patch.
pub(crate) fn patch(column: &str, value: Value) -> Row {
    let mut row = Row::new();
    row.insert(column.to_string(), value);
    row
}
