//! # Record Encoding
//!
//! Rows in the logical tables are stored as JSON objects keyed by *column
//! id*, not column name:
//!
//! ```text
//! {"1": "orders", "2": 1715003320}
//! ```
//!
//! Ids come from the layout rows persisted at schema creation, so a row can
//! only be interpreted through a loaded [`TableColumns`]. That keeps the
//! stored format stable under column renames and makes the column catalog a
//! required participant in every read and write.

use hashbrown::HashMap;
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::schema::catalog::TableColumns;

/// Encodes named fields into the column-id keyed wire form.
///
/// Every field name must exist in `columns`; the table layout decides the
/// numeric keys.
pub fn encode(columns: &TableColumns, fields: &[(&str, Value)]) -> Result<Vec<u8>> {
    let mut object = serde_json::Map::with_capacity(fields.len());
    for (name, value) in fields {
        let id = columns.id(name).ok_or_else(|| StorageError::UnknownColumn {
            table: columns.table().to_string(),
            column: (*name).to_string(),
        })?;
        object.insert(id.to_string(), value.clone());
    }
    Ok(serde_json::to_vec(&Value::Object(object))?)
}

/// Decodes a stored row back into a name-addressable [`Record`].
///
/// A key that does not parse as a column id, or an id absent from the
/// layout, means the row was written under a different schema and is
/// reported as corruption.
pub fn decode(columns: &TableColumns, bytes: &[u8]) -> Result<Record> {
    let object: serde_json::Map<String, Value> = serde_json::from_slice(bytes)?;
    let mut fields = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let id: u16 = key.parse().map_err(|_| {
            StorageError::Corrupted(format!(
                "row in '{}' has non-numeric column key '{key}'",
                columns.table()
            ))
        })?;
        let name = columns.name(id).ok_or_else(|| {
            StorageError::Corrupted(format!(
                "row in '{}' references unknown column id {id}",
                columns.table()
            ))
        })?;
        fields.insert(name.to_string(), value);
    }
    Ok(Record { fields })
}

/// A decoded row, addressable by column name.
#[derive(Debug, Clone)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn as_str(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(Value::as_str)
    }

    pub fn as_u64(&self, column: &str) -> Option<u64> {
        self.fields.get(column).and_then(Value::as_u64)
    }

    /// Byte columns are stored as JSON arrays of integers.
    pub fn as_bytes(&self, column: &str) -> Option<Vec<u8>> {
        let values = self.fields.get(column)?.as_array()?;
        values
            .iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
