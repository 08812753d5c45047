//! Dynamic values flowing between instances, statements and drivers.

use std::fmt;
use std::hash::{Hash, Hasher};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single dynamically typed value.
///
/// Instances store one `Value` per declared field; statements bind `Value`
/// parameters; drivers return rows of `Value`s.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    BigInt(i64),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Interval(TimeDelta),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "None",
            Value::Bool(_) => "bool",
            Value::BigInt(_) => "int",
            Value::Double(_) => "float",
            Value::Decimal(_) => "Decimal",
            Value::Text(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "datetime",
            Value::Interval(_) => "timedelta",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "json",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::BigInt(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Numeric view used by `gt`/`ge`/`lt`/`le` checks.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            Value::BigInt(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// JSON rendering used by `model_dump`.
    ///
    /// Decimals are rendered as strings so no precision is lost; temporal
    /// values use ISO 8601. Bytes are standard base64.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::BigInt(v) => J::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v).map_or(J::Null, J::Number),
            Value::Decimal(d) => J::String(d.to_string()),
            Value::Text(s) => J::String(s.clone()),
            Value::Bytes(b) => J::String(STANDARD.encode(b)),
            Value::Date(d) => J::String(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => J::String(t.format("%H:%M:%S%.f").to_string()),
            Value::Timestamp(ts) => J::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Value::Interval(d) => J::String(iso_duration(*d)),
            Value::Uuid(u) => J::String(u.hyphenated().to_string()),
            Value::Json(v) => v.clone(),
        }
    }

    /// Convert a JSON value into the closest `Value`.
    ///
    /// Arrays and objects stay as `Value::Json`.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => n
                .as_i64()
                .map(Value::BigInt)
                .or_else(|| n.as_f64().map(Value::Double))
                .unwrap_or(Value::Null),
            J::String(s) => Value::Text(s.clone()),
            other => Value::Json(other.clone()),
        }
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::BigInt(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Decimal(d) => d.normalize().to_string().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Time(t) => t.hash(state),
            Value::Timestamp(ts) => ts.hash(state),
            Value::Interval(d) => d.hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::Json(v) => v.to_string().hash(state),
        }
    }
}

/// Owned tuple of values usable as a map key (primary keys, join keys).
///
/// Floats compare by bit pattern and decimals by normalized value, so equal
/// keys always hash alike.
#[derive(Debug, Clone)]
pub struct ValueKey(Vec<Value>);

impl ValueKey {
    #[must_use]
    pub fn new(values: &[Value]) -> Self {
        Self(values.to_vec())
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| key_eq(a, b))
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for v in &self.0 {
            v.hash_into(state);
        }
    }
}

fn key_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        (Value::Decimal(x), Value::Decimal(y)) => x.normalize() == y.normalize(),
        _ => a == b,
    }
}

fn iso_duration(d: TimeDelta) -> String {
    let micros = d.num_microseconds().unwrap_or(i64::MAX);
    let sign = if micros < 0 { "-" } else { "" };
    let micros = micros.unsigned_abs();
    let days = micros / 86_400_000_000;
    let rem = micros % 86_400_000_000;
    let secs = rem / 1_000_000;
    let frac = rem % 1_000_000;
    let mut out = format!("{sign}P{days}DT{secs}");
    if frac != 0 {
        out.push_str(&format!(".{frac:06}"));
    }
    out.push('S');
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Text(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_value! {
    bool => Bool,
    i8 => BigInt,
    i16 => BigInt,
    i32 => BigInt,
    i64 => BigInt,
    u8 => BigInt,
    u16 => BigInt,
    u32 => BigInt,
    f32 => Double,
    f64 => Double,
    Decimal => Decimal,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
    TimeDelta => Interval,
    Uuid => Uuid,
    serde_json::Value => Json,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_none_is_null() {
        let v: Value = Option::<i64>::None.into();
        assert!(v.is_null());
        let v: Value = Some("x").into();
        assert_eq!(v, Value::Text("x".into()));
    }

    #[test]
    fn test_to_json_decimal_is_string() {
        let d: Decimal = "3.14".parse().unwrap();
        assert_eq!(Value::Decimal(d).to_json(), serde_json::json!("3.14"));
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(Value::from_json(&serde_json::json!(3)), Value::BigInt(3));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Value::Double(1.5));
        assert_eq!(Value::from_json(&serde_json::json!("a")), Value::Text("a".into()));
        assert!(matches!(
            Value::from_json(&serde_json::json!([1, 2])),
            Value::Json(_)
        ));
    }

    fn hashed(key: &ValueKey) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_value_key_distinguishes_types() {
        assert_ne!(ValueKey::new(&[Value::BigInt(1)]), ValueKey::new(&[Value::Text("1".into())]));
        let a = ValueKey::new(&[Value::BigInt(7), Value::Text("a".into())]);
        let b = ValueKey::new(&[Value::BigInt(7), Value::Text("a".into())]);
        assert_eq!(a, b);
        assert_eq!(hashed(&a), hashed(&b));
        assert_ne!(a, ValueKey::new(&[Value::BigInt(7)]));
    }

    #[test]
    fn test_value_key_equal_decimals_hash_alike() {
        let a = ValueKey::new(&[Value::Decimal(Decimal::new(10, 1))]);
        let b = ValueKey::new(&[Value::Decimal(Decimal::new(100, 2))]);
        assert_eq!(a, b);
        assert_eq!(hashed(&a), hashed(&b));
    }

    #[test]
    fn test_value_key_keeps_every_key_distinct() {
        let keys: std::collections::HashSet<ValueKey> =
            (0..10_000).map(|i| ValueKey::new(&[Value::BigInt(i)])).collect();
        assert_eq!(keys.len(), 10_000);
        assert!(keys.contains(&ValueKey::new(&[Value::BigInt(42)])));
    }

    #[test]
    fn test_iso_duration() {
        let d = TimeDelta::seconds(90_061);
        assert_eq!(Value::Interval(d).to_json(), serde_json::json!("P1DT3661S"));
    }
}
