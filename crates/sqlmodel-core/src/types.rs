//! Storage types and SQL dialects.
//!
//! [`SqlType`] is the storage-side description of a column. It knows how to
//! render itself for each [`Dialect`] and how to translate values on the way
//! into and out of the database (`bind` / `result`), which is where
//! platform-specific representations such as hex UUIDs live.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::value::Value;

/// VARCHAR length used on MySQL for strings declared without `max_length`.
pub const MYSQL_DEFAULT_STRING_LENGTH: u32 = 255;

/// SQL dialect for rendering statements and DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    Sqlite,
    Mysql,
}

impl Dialect {
    /// Bind-parameter placeholder for the 1-based index `idx`.
    #[must_use]
    pub fn placeholder(self, idx: usize) -> String {
        match self {
            Dialect::Postgres => format!("${idx}"),
            Dialect::Sqlite => format!("?{idx}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgresql",
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
        }
    }

    /// Quote an identifier for this dialect, escaping embedded quotes.
    #[must_use]
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Dialect::Mysql => crate::identifiers::quote_ident_mysql(ident),
            Dialect::Postgres | Dialect::Sqlite => crate::identifiers::quote_ident(ident),
        }
    }
}

/// Storage type of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    /// String column; `length` comes from `max_length`.
    AutoString { length: Option<u32> },
    Integer,
    BigInteger,
    Float,
    Boolean,
    DateTime,
    Date,
    Time,
    Interval,
    LargeBinary,
    /// Fixed-point numeric; either part may be absent.
    Numeric {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    /// UUID: native on Postgres, 32-char hex elsewhere.
    Uuid,
    /// Non-native enum stored as its variant name.
    Enum { name: String, variants: Vec<String> },
    Json,
    /// Verbatim type text.
    Custom(String),
}

impl SqlType {
    /// Render this type for `dialect`.
    #[must_use]
    pub fn render(&self, dialect: Dialect) -> String {
        match self {
            SqlType::AutoString { length: Some(n) } => format!("VARCHAR({n})"),
            SqlType::AutoString { length: None } => match dialect {
                Dialect::Mysql => format!("VARCHAR({MYSQL_DEFAULT_STRING_LENGTH})"),
                Dialect::Postgres | Dialect::Sqlite => "VARCHAR".to_string(),
            },
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInteger => "BIGINT".to_string(),
            SqlType::Float => "FLOAT".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::DateTime => match dialect {
                Dialect::Postgres => "TIMESTAMP WITHOUT TIME ZONE".to_string(),
                Dialect::Sqlite | Dialect::Mysql => "DATETIME".to_string(),
            },
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::Interval => match dialect {
                Dialect::Postgres => "INTERVAL".to_string(),
                Dialect::Sqlite | Dialect::Mysql => "BIGINT".to_string(),
            },
            SqlType::LargeBinary => match dialect {
                Dialect::Postgres => "BYTEA".to_string(),
                Dialect::Sqlite | Dialect::Mysql => "BLOB".to_string(),
            },
            SqlType::Numeric { precision, scale } => match (precision, scale) {
                (Some(p), Some(s)) => format!("NUMERIC({p}, {s})"),
                (Some(p), None) => format!("NUMERIC({p})"),
                _ => "NUMERIC".to_string(),
            },
            SqlType::Uuid => match dialect {
                Dialect::Postgres => "UUID".to_string(),
                Dialect::Sqlite | Dialect::Mysql => "CHAR(32)".to_string(),
            },
            SqlType::Enum { variants, .. } => {
                let longest = variants.iter().map(|v| v.chars().count()).max().unwrap_or(1);
                format!("VARCHAR({longest})")
            }
            SqlType::Json => "JSON".to_string(),
            SqlType::Custom(text) => text.clone(),
        }
    }

    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInteger)
    }

    /// Translate an instance value into its stored representation.
    #[must_use]
    pub fn bind(&self, value: &Value, dialect: Dialect) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (SqlType::Uuid, Value::Uuid(u)) if dialect != Dialect::Postgres => {
                Value::Text(u.simple().to_string())
            }
            (SqlType::Interval, Value::Interval(d)) if dialect != Dialect::Postgres => {
                d.num_microseconds().map_or(Value::Null, Value::BigInt)
            }
            (SqlType::Json, Value::Json(j)) => Value::Text(j.to_string()),
            (_, v) => v.clone(),
        }
    }

    /// Translate a stored value back into the instance representation.
    pub fn result(&self, raw: Value) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let converted = match (self, raw) {
            (SqlType::Boolean, Value::BigInt(v)) => Value::Bool(v != 0),
            (SqlType::Numeric { .. }, Value::BigInt(v)) => Value::Decimal(Decimal::from(v)),
            // Shortest round-trip text, so 3.14 stays 3.14 rather than its binary expansion
            (SqlType::Numeric { .. }, Value::Double(v)) => Value::Decimal(
                v.to_string()
                    .parse::<Decimal>()
                    .map_err(|e| decode_error(self, &e.to_string()))?,
            ),
            (SqlType::Numeric { .. }, Value::Text(s)) => Value::Decimal(
                s.parse::<Decimal>()
                    .map_err(|e| decode_error(self, &e.to_string()))?,
            ),
            (SqlType::Float, Value::BigInt(v)) => Value::Double(v as f64),
            (SqlType::DateTime, Value::Text(s)) => {
                Value::Timestamp(parse_timestamp(&s).ok_or_else(|| decode_error(self, &s))?)
            }
            (SqlType::Date, Value::Text(s)) => {
                Value::Date(parse_date(&s).ok_or_else(|| decode_error(self, &s))?)
            }
            (SqlType::Time, Value::Text(s)) => {
                Value::Time(parse_time(&s).ok_or_else(|| decode_error(self, &s))?)
            }
            (SqlType::Interval, Value::BigInt(micros)) => {
                Value::Interval(TimeDelta::microseconds(micros))
            }
            (SqlType::Uuid, Value::Text(s)) => {
                Value::Uuid(Uuid::parse_str(&s).map_err(|e| decode_error(self, &e.to_string()))?)
            }
            (SqlType::Uuid, Value::Bytes(b)) => {
                Value::Uuid(Uuid::from_slice(&b).map_err(|e| decode_error(self, &e.to_string()))?)
            }
            (SqlType::Json, Value::Text(s)) => Value::Json(
                serde_json::from_str(&s).map_err(|e| decode_error(self, &e.to_string()))?,
            ),
            (_, v) => v,
        };
        Ok(converted)
    }
}

fn decode_error(ty: &SqlType, detail: &str) -> Error {
    Error::Database(format!("cannot decode stored value as {:?}: {}", ty, detail))
}

/// Parse `YYYY-MM-DD[ T]HH:MM:SS[.ffffff]` or a bare date (midnight).
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

#[must_use]
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}
