//! Application schema.
//!
//! The schema lists every table and its typed columns. It is used to
//! sanitize raw records arriving from an untrusted source: only schema
//! columns are kept, and values of the wrong type are replaced by the
//! column's null value.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tidedb_sync_protocol::{is_local_only_field, DirtyRaw, SchemaVersion, TableName, ID_FIELD};

/// Type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// UTF-8 string.
    String,
    /// Finite number.
    Number,
    /// Boolean.
    #[serde(alias = "bool")]
    Boolean,
}

/// A typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column accepts `null`.
    #[serde(default)]
    pub is_optional: bool,
    /// Whether the column is indexed.
    #[serde(default)]
    pub is_indexed: bool,
}

impl ColumnSchema {
    /// Creates a required, unindexed column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_optional: false,
            is_indexed: false,
        }
    }

    /// Creates a required string column.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::String)
    }

    /// Creates a required number column.
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Number)
    }

    /// Creates a required boolean column.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    /// Makes the column optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    /// Makes the column indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.is_indexed = true;
        self
    }

    /// Value stored when the column has no valid value.
    ///
    /// `null` for optional columns, otherwise the type's empty value.
    pub fn null_value(&self) -> Value {
        if self.is_optional {
            return Value::Null;
        }
        match self.column_type {
            ColumnType::String => Value::String(String::new()),
            ColumnType::Number => Value::from(0),
            ColumnType::Boolean => Value::Bool(false),
        }
    }

    /// Coerces a possibly missing or mistyped value into a valid one.
    pub fn sanitize_value(&self, value: Option<&Value>) -> Value {
        match (self.column_type, value) {
            (ColumnType::String, Some(Value::String(s))) => Value::String(s.clone()),
            (ColumnType::Number, Some(Value::Number(n))) => Value::Number(n.clone()),
            (ColumnType::Boolean, Some(Value::Bool(b))) => Value::Bool(*b),
            // SQL engines store booleans as 0/1
            (ColumnType::Boolean, Some(Value::Number(n))) => match n.as_i64() {
                Some(0) => Value::Bool(false),
                Some(1) => Value::Bool(true),
                _ => self.null_value(),
            },
            _ => self.null_value(),
        }
    }
}

/// Schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TableSchemaDef", into = "TableSchemaDef")]
pub struct TableSchema {
    /// Table name.
    pub name: TableName,
    /// Columns keyed by name.
    pub columns: BTreeMap<String, ColumnSchema>,
}

// Columns travel as a list in JSON definitions.
#[derive(Serialize, Deserialize)]
struct TableSchemaDef {
    name: TableName,
    columns: Vec<ColumnSchema>,
}

impl From<TableSchemaDef> for TableSchema {
    fn from(def: TableSchemaDef) -> Self {
        Self::new(def.name, def.columns)
    }
}

impl From<TableSchema> for TableSchemaDef {
    fn from(table: TableSchema) -> Self {
        Self {
            name: table.name,
            columns: table.columns.into_values().collect(),
        }
    }
}

impl TableSchema {
    /// Creates a table schema from a list of columns.
    pub fn new(name: impl Into<TableName>, columns: impl IntoIterator<Item = ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    /// Returns true if the table has the column.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Keeps only schema columns, coercing each value to its column type.
    ///
    /// `id` and local sync fields are never part of the result.
    pub fn sanitize(&self, raw: &DirtyRaw) -> BTreeMap<String, Value> {
        self.columns
            .values()
            .map(|column| (column.name.clone(), column.sanitize_value(raw.get(&column.name))))
            .collect()
    }

    /// Checks that every given column belongs to the table.
    pub fn check_columns<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> StoreResult<()> {
        for name in names {
            if !self.has_column(name) {
                return Err(StoreError::UnknownColumn {
                    table: self.name.clone(),
                    column: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate(&self) -> StoreResult<()> {
        if self.name.is_empty() {
            return Err(StoreError::invalid_schema("table name must not be empty"));
        }
        for (key, column) in &self.columns {
            if key != &column.name {
                return Err(StoreError::invalid_schema(format!(
                    "column key {key} does not match column name {} in table {}",
                    column.name, self.name
                )));
            }
            if column.name == ID_FIELD || is_local_only_field(&column.name) {
                return Err(StoreError::invalid_schema(format!(
                    "column name {} is reserved (table {})",
                    column.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Schema of the whole application database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSchema {
    version: SchemaVersion,
    tables: BTreeMap<TableName, TableSchema>,
}

impl AppSchema {
    /// Creates a validated schema.
    pub fn new(
        version: SchemaVersion,
        tables: impl IntoIterator<Item = TableSchema>,
    ) -> StoreResult<Self> {
        if version < 1 {
            return Err(StoreError::invalid_schema("schema version must be at least 1"));
        }
        let mut map = BTreeMap::new();
        for table in tables {
            table.validate()?;
            let name = table.name.clone();
            if map.insert(name.clone(), table).is_some() {
                return Err(StoreError::invalid_schema(format!("duplicate table {name}")));
            }
        }
        Ok(Self {
            version,
            tables: map,
        })
    }

    /// Current schema version.
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Returns a table schema.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Returns a table schema or an unknown table error.
    pub fn require_table(&self, name: &str) -> StoreResult<&TableSchema> {
        self.table(name).ok_or_else(|| StoreError::unknown_table(name))
    }

    /// Iterates over tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Table names in name order.
    pub fn table_names(&self) -> BTreeSet<&str> {
        self.tables.keys().map(String::as_str).collect()
    }
}
