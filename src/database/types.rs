//! SQL Server type mapping between tiberius and JSON.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use std::str::FromStr;
use tiberius::{ColumnData, Row, ToSql};
use tracing::warn;
use uuid::Uuid;

/// Type mapper for converting SQL Server values to JSON.
pub struct TypeMapper;

impl TypeMapper {
    /// Extract a value from a tiberius row column.
    pub fn extract_column(row: &Row, idx: usize) -> Value {
        let Some(column) = row.columns().get(idx) else {
            return Value::Null;
        };
        let money = matches!(
            column.column_type(),
            tiberius::ColumnType::Money | tiberius::ColumnType::Money4
        );

        if let Some(v) = row.try_get::<&str, _>(idx).ok().flatten() {
            return Value::String(v.to_string());
        }

        if let Some(v) = row.try_get::<i32, _>(idx).ok().flatten() {
            return Value::from(v);
        }
        if let Some(v) = row.try_get::<i64, _>(idx).ok().flatten() {
            return Value::from(v);
        }
        if let Some(v) = row.try_get::<i16, _>(idx).ok().flatten() {
            return Value::from(v);
        }
        // TINYINT is unsigned in SQL Server
        if let Some(v) = row.try_get::<u8, _>(idx).ok().flatten() {
            return Value::from(v);
        }

        if let Some(v) = row.try_get::<f64, _>(idx).ok().flatten() {
            return if money { money_value(v) } else { float_value(v) };
        }
        if let Some(v) = row.try_get::<f32, _>(idx).ok().flatten() {
            let v = f64::from(v);
            return if money { money_value(v) } else { float_value(v) };
        }

        if let Some(v) = row.try_get::<Decimal, _>(idx).ok().flatten() {
            return decimal_value(v);
        }

        if let Some(v) = row.try_get::<bool, _>(idx).ok().flatten() {
            return Value::Bool(v);
        }

        if let Some(v) = row.try_get::<Uuid, _>(idx).ok().flatten() {
            return Value::String(v.to_string().to_uppercase());
        }

        if let Some(v) = row.try_get::<NaiveDateTime, _>(idx).ok().flatten() {
            return Value::String(v.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string());
        }
        if let Some(v) = row.try_get::<DateTime<FixedOffset>, _>(idx).ok().flatten() {
            return Value::String(v.with_timezone(&Utc).to_rfc3339());
        }
        if let Some(v) = row.try_get::<NaiveDate, _>(idx).ok().flatten() {
            return Value::String(v.format("%Y-%m-%d").to_string());
        }
        if let Some(v) = row.try_get::<NaiveTime, _>(idx).ok().flatten() {
            return Value::String(v.format("%H:%M:%S%.3f").to_string());
        }

        if let Some(v) = row.try_get::<&[u8], _>(idx).ok().flatten() {
            return Value::String(format!("0x{}", hex::encode(v)));
        }

        Value::Null
    }

    /// Get the SQL type name for a column.
    pub fn sql_type_name(col: &tiberius::Column) -> &'static str {
        use tiberius::ColumnType;

        match col.column_type() {
            ColumnType::Null => "null",
            ColumnType::Int1 => "tinyint",
            ColumnType::Int2 => "smallint",
            ColumnType::Int4 | ColumnType::Intn => "int",
            ColumnType::Int8 => "bigint",
            ColumnType::Float4 => "real",
            ColumnType::Float8 | ColumnType::Floatn => "float",
            ColumnType::Money => "money",
            ColumnType::Money4 => "smallmoney",
            ColumnType::Datetime | ColumnType::Datetimen => "datetime",
            ColumnType::Datetime4 => "smalldatetime",
            ColumnType::Bit | ColumnType::Bitn => "bit",
            ColumnType::Guid => "uniqueidentifier",
            ColumnType::Decimaln => "decimal",
            ColumnType::Numericn => "numeric",
            ColumnType::Daten => "date",
            ColumnType::Timen => "time",
            ColumnType::Datetime2 => "datetime2",
            ColumnType::DatetimeOffsetn => "datetimeoffset",
            ColumnType::BigVarBin => "varbinary",
            ColumnType::BigVarChar => "varchar",
            ColumnType::BigBinary => "binary",
            ColumnType::BigChar => "char",
            ColumnType::NVarchar => "nvarchar",
            ColumnType::NChar => "nchar",
            ColumnType::Xml => "xml",
            ColumnType::Text => "text",
            ColumnType::Image => "image",
            ColumnType::NText => "ntext",
            ColumnType::SSVariant => "sql_variant",
            _ => "unknown",
        }
    }
}

fn float_value(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// DECIMAL and NUMERIC travel as exact decimal text.
fn decimal_value(v: Decimal) -> Value {
    Value::String(v.to_string())
}

/// The driver hands MONEY over as a float; four places is the type's scale.
fn money_value(v: f64) -> Value {
    Decimal::from_f64(v)
        .map(|d| decimal_value(d.round_dp(4)))
        .unwrap_or(Value::Null)
}

/// Declared type of a stored procedure parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Decimal,
    Numeric,
    Money,
    SmallMoney,
    Float,
    Real,
    Date,
    Time,
    DateTime,
    DateTime2,
    SmallDateTime,
    DateTimeOffset,
    Char,
    VarChar,
    Text,
    NChar,
    NVarChar,
    NText,
    Binary,
    VarBinary,
    Image,
    UniqueIdentifier,
    Xml,
    Variant,
}

/// Accepted type names, matched case-insensitively.
const PARAM_TYPES: &[(&str, ParamType)] = &[
    ("bit", ParamType::Bit),
    ("tinyint", ParamType::TinyInt),
    ("smallint", ParamType::SmallInt),
    ("int", ParamType::Int),
    ("bigint", ParamType::BigInt),
    ("decimal", ParamType::Decimal),
    ("numeric", ParamType::Numeric),
    ("money", ParamType::Money),
    ("smallmoney", ParamType::SmallMoney),
    ("float", ParamType::Float),
    ("real", ParamType::Real),
    ("date", ParamType::Date),
    ("time", ParamType::Time),
    ("datetime", ParamType::DateTime),
    ("datetime2", ParamType::DateTime2),
    ("smalldatetime", ParamType::SmallDateTime),
    ("datetimeoffset", ParamType::DateTimeOffset),
    ("char", ParamType::Char),
    ("varchar", ParamType::VarChar),
    ("text", ParamType::Text),
    ("nchar", ParamType::NChar),
    ("nvarchar", ParamType::NVarChar),
    ("ntext", ParamType::NText),
    ("binary", ParamType::Binary),
    ("varbinary", ParamType::VarBinary),
    ("image", ParamType::Image),
    ("uniqueidentifier", ParamType::UniqueIdentifier),
    ("xml", ParamType::Xml),
    ("variant", ParamType::Variant),
    ("sql_variant", ParamType::Variant),
    ("string", ParamType::NVarChar),
    ("number", ParamType::Int),
    ("boolean", ParamType::Bit),
];

impl ParamType {
    /// Look up a type name.
    pub fn lookup(name: &str) -> Option<Self> {
        let name = name.trim();
        PARAM_TYPES
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, ty)| *ty)
    }

    /// Look up a type name, falling back to `nvarchar` for unknown names.
    pub fn resolve(name: &str) -> Self {
        Self::lookup(name).unwrap_or_else(|| {
            warn!(param_type = name, "Unknown parameter type, defaulting to nvarchar");
            ParamType::NVarChar
        })
    }

    /// Type text used to declare an OUTPUT variable of this type.
    pub fn declaration(&self) -> &'static str {
        match self {
            ParamType::Bit => "BIT",
            ParamType::TinyInt => "TINYINT",
            ParamType::SmallInt => "SMALLINT",
            ParamType::Int => "INT",
            ParamType::BigInt => "BIGINT",
            ParamType::Decimal => "DECIMAL(38, 10)",
            ParamType::Numeric => "NUMERIC(38, 10)",
            ParamType::Money => "MONEY",
            ParamType::SmallMoney => "SMALLMONEY",
            ParamType::Float => "FLOAT",
            ParamType::Real => "REAL",
            ParamType::Date => "DATE",
            ParamType::Time => "TIME",
            ParamType::DateTime => "DATETIME",
            ParamType::DateTime2 => "DATETIME2",
            ParamType::SmallDateTime => "SMALLDATETIME",
            ParamType::DateTimeOffset => "DATETIMEOFFSET",
            ParamType::Char | ParamType::VarChar | ParamType::Text => "VARCHAR(MAX)",
            ParamType::NChar | ParamType::NVarChar | ParamType::NText => "NVARCHAR(MAX)",
            ParamType::Binary | ParamType::VarBinary | ParamType::Image => "VARBINARY(MAX)",
            ParamType::UniqueIdentifier => "UNIQUEIDENTIFIER",
            ParamType::Xml => "XML",
            ParamType::Variant => "SQL_VARIANT",
        }
    }

    /// Convert a JSON value into a typed parameter. `None` and JSON null bind
    /// as a typed NULL.
    pub fn bind(&self, value: Option<&Value>) -> Result<ParamValue, String> {
        let value = value.filter(|v| !v.is_null());

        let bound = match self {
            ParamType::Bit => ParamValue::Bit(value.map(to_bool).transpose()?),
            ParamType::TinyInt => ParamValue::TinyInt(value.map(to_int).transpose()?),
            ParamType::SmallInt => ParamValue::SmallInt(value.map(to_int).transpose()?),
            ParamType::Int => ParamValue::Int(value.map(to_int).transpose()?),
            ParamType::BigInt => ParamValue::BigInt(value.map(to_int).transpose()?),
            ParamType::Decimal
            | ParamType::Numeric
            | ParamType::Money
            | ParamType::SmallMoney => ParamValue::Decimal(value.map(to_decimal).transpose()?),
            ParamType::Float => ParamValue::Float(value.map(to_float).transpose()?),
            ParamType::Real => {
                ParamValue::Real(value.map(to_float).transpose()?.map(|v| v as f32))
            }
            ParamType::Date => ParamValue::Date(value.map(to_date).transpose()?),
            ParamType::Time => ParamValue::Time(value.map(to_time).transpose()?),
            ParamType::DateTime | ParamType::DateTime2 | ParamType::SmallDateTime => {
                ParamValue::DateTime(value.map(to_datetime).transpose()?)
            }
            ParamType::DateTimeOffset => {
                ParamValue::DateTimeOffset(value.map(to_datetime_offset).transpose()?)
            }
            ParamType::Binary | ParamType::VarBinary | ParamType::Image => {
                ParamValue::Binary(value.map(to_bytes).transpose()?)
            }
            ParamType::UniqueIdentifier => ParamValue::Guid(value.map(to_uuid).transpose()?),
            ParamType::Char
            | ParamType::VarChar
            | ParamType::Text
            | ParamType::NChar
            | ParamType::NVarChar
            | ParamType::NText
            | ParamType::Xml
            | ParamType::Variant => ParamValue::String(value.map(to_text)),
        };

        Ok(bound)
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bit(Option<bool>),
    TinyInt(Option<u8>),
    SmallInt(Option<i16>),
    Int(Option<i32>),
    BigInt(Option<i64>),
    Decimal(Option<Decimal>),
    Float(Option<f64>),
    Real(Option<f32>),
    Date(Option<NaiveDate>),
    Time(Option<NaiveTime>),
    DateTime(Option<NaiveDateTime>),
    DateTimeOffset(Option<DateTime<FixedOffset>>),
    String(Option<String>),
    Binary(Option<Vec<u8>>),
    Guid(Option<Uuid>),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        match self {
            ParamValue::Bit(v) => v.is_none(),
            ParamValue::TinyInt(v) => v.is_none(),
            ParamValue::SmallInt(v) => v.is_none(),
            ParamValue::Int(v) => v.is_none(),
            ParamValue::BigInt(v) => v.is_none(),
            ParamValue::Decimal(v) => v.is_none(),
            ParamValue::Float(v) => v.is_none(),
            ParamValue::Real(v) => v.is_none(),
            ParamValue::Date(v) => v.is_none(),
            ParamValue::Time(v) => v.is_none(),
            ParamValue::DateTime(v) => v.is_none(),
            ParamValue::DateTimeOffset(v) => v.is_none(),
            ParamValue::String(v) => v.is_none(),
            ParamValue::Binary(v) => v.is_none(),
            ParamValue::Guid(v) => v.is_none(),
        }
    }
}

impl ToSql for ParamValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            ParamValue::Bit(v) => v.to_sql(),
            ParamValue::TinyInt(v) => v.to_sql(),
            ParamValue::SmallInt(v) => v.to_sql(),
            ParamValue::Int(v) => v.to_sql(),
            ParamValue::BigInt(v) => v.to_sql(),
            ParamValue::Decimal(v) => v.to_sql(),
            ParamValue::Float(v) => v.to_sql(),
            ParamValue::Real(v) => v.to_sql(),
            ParamValue::Date(v) => v.to_sql(),
            ParamValue::Time(v) => v.to_sql(),
            ParamValue::DateTime(v) => v.to_sql(),
            ParamValue::DateTimeOffset(v) => v.to_sql(),
            ParamValue::String(v) => v.to_sql(),
            ParamValue::Binary(v) => v.to_sql(),
            ParamValue::Guid(v) => v.to_sql(),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

fn to_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(format!("cannot convert {} to bit", describe(value))),
        },
        _ => Err(format!("cannot convert {} to bit", describe(value))),
    }
}

fn to_int<T: TryFrom<i64>>(value: &Value) -> Result<T, String> {
    let wide = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };

    wide.and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| format!("cannot convert {} to an integer of this size", describe(value)))
}

fn to_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("cannot convert {} to float", describe(value)))
}

fn to_decimal(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| Decimal::from_str(&n.to_string()).ok())
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
    .ok_or_else(|| format!("cannot convert {} to decimal", describe(value)))
}

fn as_str<'a>(value: &'a Value, target: &str) -> Result<&'a str, String> {
    value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| format!("cannot convert {} to {}", describe(value), target))
}

fn to_date(value: &Value) -> Result<NaiveDate, String> {
    let s = as_str(value, "date")?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
        .ok_or_else(|| format!("cannot convert {} to date", describe(value)))
}

fn to_time(value: &Value) -> Result<NaiveTime, String> {
    let s = as_str(value, "time")?;
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("cannot convert {} to time", describe(value)))
}

fn to_datetime(value: &Value) -> Result<NaiveDateTime, String> {
    let s = as_str(value, "datetime")?;
    parse_datetime(s)
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("cannot convert {} to datetime", describe(value)))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok())
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
}

fn to_datetime_offset(value: &Value) -> Result<DateTime<FixedOffset>, String> {
    let s = as_str(value, "datetimeoffset")?;
    DateTime::parse_from_rfc3339(s)
        .map_err(|_| format!("cannot convert {} to datetimeoffset", describe(value)))
}

fn to_bytes(value: &Value) -> Result<Vec<u8>, String> {
    match value {
        Value::String(s) => hex::decode(s.trim()),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect(),
        _ => None,
    }
    .ok_or_else(|| format!("cannot convert {} to binary", describe(value)))
}

fn to_uuid(value: &Value) -> Result<Uuid, String> {
    let s = as_str(value, "uniqueidentifier")?;
    Uuid::parse_str(s).map_err(|_| format!("cannot convert {} to uniqueidentifier", describe(value)))
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Hex helpers for binary values.
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Decode hex text with an optional `0x` prefix.
    pub fn decode(text: &str) -> Option<Vec<u8>> {
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.len() % 2 != 0 || !digits.is_ascii() {
            return None;
        }
        (0..digits.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
            .collect()
    }
}
