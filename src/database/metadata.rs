//! SQL Server metadata queries for schema introspection.

use super::driver::RecordSet;
use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Tables joined with their columns and primary-key membership.
pub const SCHEMA_QUERY: &str = r#"
SELECT
    t.TABLE_SCHEMA AS table_schema,
    t.TABLE_NAME AS table_name,
    c.COLUMN_NAME AS column_name,
    c.ORDINAL_POSITION AS ordinal_position,
    c.DATA_TYPE AS data_type,
    c.CHARACTER_MAXIMUM_LENGTH AS max_length,
    c.NUMERIC_PRECISION AS numeric_precision,
    c.NUMERIC_SCALE AS numeric_scale,
    c.IS_NULLABLE AS is_nullable,
    CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS is_primary_key
FROM INFORMATION_SCHEMA.TABLES t
INNER JOIN INFORMATION_SCHEMA.COLUMNS c
    ON t.TABLE_SCHEMA = c.TABLE_SCHEMA
    AND t.TABLE_NAME = c.TABLE_NAME
LEFT JOIN (
    SELECT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    INNER JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
        ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
        AND tc.TABLE_SCHEMA = ku.TABLE_SCHEMA
        AND tc.TABLE_NAME = ku.TABLE_NAME
    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
) pk
    ON c.TABLE_SCHEMA = pk.TABLE_SCHEMA
    AND c.TABLE_NAME = pk.TABLE_NAME
    AND c.COLUMN_NAME = pk.COLUMN_NAME
WHERE t.TABLE_TYPE = 'BASE TABLE'
ORDER BY t.TABLE_SCHEMA, t.TABLE_NAME, c.ORDINAL_POSITION
"#;

/// A base table and its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub schema: String,
    pub name: String,
    /// `schema.name`
    pub full_name: String,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnSchema>,
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    /// Type with length or precision, e.g. `nvarchar(50)`, `decimal(10,2)`.
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Types rendered with a length suffix.
const SIZED_TYPES: &[&str] = &["char", "varchar", "nchar", "nvarchar", "binary", "varbinary"];

/// Types rendered with precision and scale.
const SCALED_TYPES: &[&str] = &["decimal", "numeric"];

/// Render a column type from its INFORMATION_SCHEMA parts.
pub fn render_data_type(
    data_type: &str,
    max_length: Option<i64>,
    precision: Option<i64>,
    scale: Option<i64>,
) -> String {
    let lowered = data_type.to_lowercase();

    if SIZED_TYPES.contains(&lowered.as_str()) {
        return match max_length {
            Some(-1) => format!("{}(max)", data_type),
            Some(len) => format!("{}({})", data_type, len),
            None => data_type.to_string(),
        };
    }

    if SCALED_TYPES.contains(&lowered.as_str()) {
        if let Some(p) = precision {
            return format!("{}({},{})", data_type, p, scale.unwrap_or(0));
        }
    }

    data_type.to_string()
}

/// Build the ordered table list from the metadata row-set.
pub fn assemble_tables(set: &RecordSet) -> Result<Vec<TableSchema>, ServerError> {
    let column = |name: &str| {
        set.column_index(name).ok_or_else(|| {
            ServerError::schema(format!("Schema query did not return column '{}'", name))
        })
    };
    let schema_idx = column("table_schema")?;
    let table_idx = column("table_name")?;
    let column_idx = column("column_name")?;
    let ordinal_idx = column("ordinal_position")?;
    let type_idx = column("data_type")?;
    let length_idx = column("max_length")?;
    let precision_idx = column("numeric_precision")?;
    let scale_idx = column("numeric_scale")?;
    let nullable_idx = column("is_nullable")?;
    let pk_idx = column("is_primary_key")?;

    let mut grouped: BTreeMap<(String, String), Vec<(i64, ColumnSchema)>> = BTreeMap::new();

    for row in &set.rows {
        let cell = |idx: usize| row.get(idx).unwrap_or(&Value::Null);

        let schema = text(cell(schema_idx));
        let table = text(cell(table_idx));
        let data_type = text(cell(type_idx));

        let column = ColumnSchema {
            name: text(cell(column_idx)),
            data_type: render_data_type(
                &data_type,
                integer(cell(length_idx)),
                integer(cell(precision_idx)),
                integer(cell(scale_idx)),
            ),
            nullable: flag(cell(nullable_idx)),
            primary_key: flag(cell(pk_idx)),
        };
        let ordinal = integer(cell(ordinal_idx)).unwrap_or(0);

        grouped.entry((schema, table)).or_default().push((ordinal, column));
    }

    Ok(grouped
        .into_iter()
        .map(|((schema, name), mut columns)| {
            columns.sort_by_key(|(ordinal, _)| *ordinal);
            TableSchema {
                full_name: format!("{}.{}", schema, name),
                schema,
                name,
                columns: columns.into_iter().map(|(_, column)| column).collect(),
            }
        })
        .collect())
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|v| v != 0),
        Value::String(s) => s.eq_ignore_ascii_case("yes") || s == "1",
        _ => false,
    }
}
