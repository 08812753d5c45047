//! Field validation: lax coercion plus constraint checks.
//!
//! [`validate_value`] is the single entry point used by model construction,
//! `model_validate` and validated assignment. It first coerces the input to
//! the field's annotation, then checks the field's constraints, and reports
//! every failure for the field as a [`FieldValidationError`].

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use chrono::{DateTime, NaiveTime, TimeDelta};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::annotation::Annotation;
use crate::error::{FieldValidationError, ValidationErrorKind};
use crate::field::FieldInfo;
use crate::types::{parse_date, parse_time, parse_timestamp};
use crate::value::Value;

/// Thread-safe regex cache for compiled patterns.
///
/// This avoids recompiling regex patterns on every validation call.
/// Patterns are compiled lazily on first use and cached for the lifetime
/// of the program.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        // Fast path: check if already cached
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        // Slow path: compile and cache
        let regex = Regex::new(pattern)?;
        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            cache.insert(pattern.to_string(), regex.clone());
        }
        Ok(regex)
    }
}

/// Global regex cache singleton.
fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a regex pattern (search semantics).
///
/// Compiled patterns are cached for the lifetime of the program.
///
/// # Arguments
///
/// * `value` - The string to validate
/// * `pattern` - The regex pattern to match against
///
/// # Returns
///
/// `true` if the value matches the pattern, `false` otherwise.
/// Returns `false` if the pattern is invalid (logs a warning).
///
/// # Example
///
/// ```ignore
/// use sqlmodel_core::validate::matches_pattern;
///
/// assert!(matches_pattern("test@example.com", r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"));
/// assert!(!matches_pattern("invalid", r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"));
/// ```
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            // Log the error but don't panic - validation should be resilient
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

/// Check a regex pattern when a model is declared.
///
/// Returns an error message if the pattern is invalid, None if valid.
pub fn validate_pattern(pattern: &str) -> Option<String> {
    match Regex::new(pattern) {
        Ok(_) => None,
        Err(e) => Some(format!("invalid regex pattern: {e}")),
    }
}


/// A failure kind with its message, before a location is attached.
pub type Failure = (ValidationErrorKind, String);

/// Validate one field value: coerce to `annotation`, then check `field`'s
/// constraints.
///
/// Returns the coerced value, or every failure found for the field.
pub fn validate_value(
    name: &str,
    annotation: &Annotation,
    field: &FieldInfo,
    value: Value,
) -> Result<Value, Vec<FieldValidationError>> {
    let coerced = coerce(annotation, value).map_err(|(kind, message)| {
        vec![FieldValidationError::new(name, kind, message)]
    })?;
    let failures = check_constraints(field, &coerced);
    if failures.is_empty() {
        Ok(coerced)
    } else {
        Err(failures
            .into_iter()
            .map(|(kind, message)| FieldValidationError::new(name, kind, message))
            .collect())
    }
}

/// Lax coercion of `value` to `annotation`.
pub fn coerce(annotation: &Annotation, value: Value) -> Result<Value, Failure> {
    if value.is_null() {
        return if annotation.admits_none() {
            Ok(Value::Null)
        } else {
            Err((
                ValidationErrorKind::NoneNotAllowed,
                format!("Input should be a valid {annotation}, not None"),
            ))
        };
    }
    match annotation {
        Annotation::Any => Ok(value),
        Annotation::NoneType => Err(type_error("None", &value)),
        Annotation::Optional(inner) => coerce(inner, value),
        Annotation::Union(_) => {
            let mut last = type_error(&annotation.to_string(), &value);
            for arm in annotation.non_none_arms() {
                match coerce(arm, value.clone()) {
                    Ok(v) => return Ok(v),
                    Err(e) => last = e,
                }
            }
            Err(last)
        }
        Annotation::Str | Annotation::Path => match value {
            Value::Text(_) => Ok(value),
            other => Err(type_error("string", &other)),
        },
        Annotation::Int => coerce_int(value),
        Annotation::Float => match value {
            Value::Double(_) => Ok(value),
            Value::BigInt(v) => Ok(Value::Double(v as f64)),
            Value::Decimal(d) => d
                .to_f64()
                .map(Value::Double)
                .ok_or_else(|| type_error("number", &Value::Decimal(d))),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| parse_error("number", &s)),
            other => Err(type_error("number", &other)),
        },
        Annotation::Bool => match value {
            Value::Bool(_) => Ok(value),
            Value::BigInt(0) => Ok(Value::Bool(false)),
            Value::BigInt(1) => Ok(Value::Bool(true)),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "on" | "t" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "n" | "off" | "f" => Ok(Value::Bool(false)),
                _ => Err(parse_error("boolean", &s)),
            },
            other => Err(type_error("boolean", &other)),
        },
        Annotation::Decimal => match value {
            Value::Decimal(_) => Ok(value),
            Value::BigInt(v) => Ok(Value::Decimal(Decimal::from(v))),
            Value::Double(v) => Decimal::try_from(v)
                .map(Value::Decimal)
                .map_err(|_| type_error("decimal", &Value::Double(v))),
            Value::Text(s) => s
                .trim()
                .parse::<Decimal>()
                .map(Value::Decimal)
                .map_err(|_| parse_error("decimal", &s)),
            other => Err(type_error("decimal", &other)),
        },
        Annotation::DateTime => match value {
            Value::Timestamp(_) => Ok(value),
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(Value::Timestamp)
                .ok_or_else(|| type_error("datetime", &Value::Date(d))),
            Value::BigInt(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| Value::Timestamp(dt.naive_utc()))
                .ok_or_else(|| type_error("datetime", &Value::BigInt(secs))),
            Value::Text(s) => parse_timestamp(&s)
                .map(Value::Timestamp)
                .ok_or_else(|| parse_error("datetime", &s)),
            other => Err(type_error("datetime", &other)),
        },
        Annotation::Date => match value {
            Value::Date(_) => Ok(value),
            Value::Timestamp(ts) if ts.time() == NaiveTime::MIN => Ok(Value::Date(ts.date())),
            Value::Text(s) => parse_date(&s)
                .map(Value::Date)
                .ok_or_else(|| parse_error("date", &s)),
            other => Err(type_error("date", &other)),
        },
        Annotation::Time => match value {
            Value::Time(_) => Ok(value),
            Value::Text(s) => parse_time(&s)
                .map(Value::Time)
                .ok_or_else(|| parse_error("time", &s)),
            other => Err(type_error("time", &other)),
        },
        Annotation::Duration => match value {
            Value::Interval(_) => Ok(value),
            Value::BigInt(secs) => TimeDelta::try_seconds(secs)
                .map(Value::Interval)
                .ok_or_else(|| type_error("timedelta", &Value::BigInt(secs))),
            Value::Double(secs) => Ok(Value::Interval(TimeDelta::microseconds(
                (secs * 1_000_000.0) as i64,
            ))),
            other => Err(type_error("timedelta", &other)),
        },
        Annotation::Bytes => match value {
            Value::Bytes(_) => Ok(value),
            Value::Text(s) => Ok(Value::Bytes(s.into_bytes())),
            other => Err(type_error("bytes", &other)),
        },
        Annotation::Uuid => match value {
            Value::Uuid(_) => Ok(value),
            Value::Text(s) => Uuid::parse_str(s.trim())
                .map(Value::Uuid)
                .map_err(|_| parse_error("UUID", &s)),
            Value::Bytes(b) => Uuid::from_slice(&b)
                .map(Value::Uuid)
                .map_err(|_| type_error("UUID", &Value::Bytes(b))),
            other => Err(type_error("UUID", &other)),
        },
        Annotation::Enum(def) => match value {
            Value::Text(s) if def.contains(&s) => Ok(Value::Text(s)),
            other => Err((
                ValidationErrorKind::Enum,
                format!(
                    "Input should be {}, got {}",
                    def.variants
                        .iter()
                        .map(|v| format!("'{v}'"))
                        .collect::<Vec<_>>()
                        .join(" or "),
                    other
                ),
            )),
        },
        Annotation::IpAddr => match value {
            Value::Text(s) if s.trim().parse::<std::net::IpAddr>().is_ok() => Ok(Value::Text(s)),
            other => Err(type_error("IP address", &other)),
        },
        Annotation::IpNetwork => match value {
            Value::Text(s) if is_ip_network(&s) => Ok(Value::Text(s)),
            other => Err(type_error("IP network", &other)),
        },
        Annotation::Json => match value {
            Value::Json(_) => Ok(value),
            other => Ok(Value::Json(other.to_json())),
        },
        Annotation::List(inner) => match value {
            Value::Json(serde_json::Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    let v = coerce(inner, Value::from_json(item))?;
                    out.push(v.to_json());
                }
                Ok(Value::Json(serde_json::Value::Array(out)))
            }
            other => Err(type_error("list", &other)),
        },
        Annotation::Model(_) => match value {
            Value::Json(serde_json::Value::Object(_)) => Ok(value),
            other => Err(type_error("dictionary or instance", &other)),
        },
    }
}

fn coerce_int(value: Value) -> Result<Value, Failure> {
    match value {
        Value::BigInt(_) => Ok(value),
        Value::Bool(b) => Ok(Value::BigInt(i64::from(b))),
        Value::Double(f) if f.is_finite() && f.fract() == 0.0 => Ok(Value::BigInt(f as i64)),
        Value::Double(f) => Err((
            ValidationErrorKind::Type,
            format!("Input should be a valid integer, got a number with a fractional part ({f})"),
        )),
        Value::Decimal(d) if d.fract().is_zero() => d
            .to_i64()
            .map(Value::BigInt)
            .ok_or_else(|| type_error("integer", &Value::Decimal(d))),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::BigInt)
            .map_err(|_| parse_error("integer", &s)),
        other => Err(type_error("integer", &other)),
    }
}

fn is_ip_network(s: &str) -> bool {
    let Some((addr, prefix)) = s.trim().split_once('/') else {
        return s.trim().parse::<std::net::IpAddr>().is_ok();
    };
    match (addr.parse::<std::net::IpAddr>(), prefix.parse::<u8>()) {
        (Ok(std::net::IpAddr::V4(_)), Ok(p)) => p <= 32,
        (Ok(std::net::IpAddr::V6(_)), Ok(p)) => p <= 128,
        _ => false,
    }
}

fn type_error(expected: &str, got: &Value) -> Failure {
    (
        ValidationErrorKind::Type,
        format!("Input should be a valid {expected}, got {}", got.type_name()),
    )
}

fn parse_error(expected: &str, input: &str) -> Failure {
    (
        ValidationErrorKind::Type,
        format!("Input should be a valid {expected}, unable to parse '{input}'"),
    )
}

/// Constraint checks on an already coerced value.
pub fn check_constraints(field: &FieldInfo, value: &Value) -> Vec<Failure> {
    let mut failures = Vec::new();
    if value.is_null() {
        return failures;
    }

    let length = match value {
        Value::Text(s) => Some(s.chars().count()),
        Value::Bytes(b) => Some(b.len()),
        Value::Json(serde_json::Value::Array(items)) => Some(items.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min) = field.min_length {
            if len < min {
                failures.push((
                    ValidationErrorKind::TooShort,
                    format!("Value should have at least {min} items/characters, not {len}"),
                ));
            }
        }
        if let Some(max) = field.max_length {
            if len > max {
                failures.push((
                    ValidationErrorKind::TooLong,
                    format!("Value should have at most {max} items/characters, not {len}"),
                ));
            }
        }
    }

    if let (Some(pattern), Value::Text(s)) = (&field.regex, value) {
        if !matches_pattern(s, pattern) {
            failures.push((
                ValidationErrorKind::Pattern,
                format!("String should match pattern '{pattern}'"),
            ));
        }
    }

    if let Some(n) = value.as_f64() {
        let bounds = [
            (field.gt, ValidationErrorKind::GreaterThan, "greater than"),
            (field.ge, ValidationErrorKind::GreaterThanEqual, "greater than or equal to"),
            (field.lt, ValidationErrorKind::LessThan, "less than"),
            (field.le, ValidationErrorKind::LessThanEqual, "less than or equal to"),
        ];
        for (bound, kind, text) in bounds {
            let Some(b) = bound else { continue };
            let ok = match kind {
                ValidationErrorKind::GreaterThan => n > b,
                ValidationErrorKind::GreaterThanEqual => n >= b,
                ValidationErrorKind::LessThan => n < b,
                _ => n <= b,
            };
            if !ok {
                failures.push((kind, format!("Input should be {text} {b}")));
            }
        }
    }

    if let Value::Decimal(d) = value {
        failures.extend(check_decimal(field.max_digits, field.decimal_places, d));
    }
    failures
}

/// Total significant digits and digits after the point of a normalized
/// decimal. Trailing zeros of an integer count as digits.
#[must_use]
pub fn decimal_digits(d: &Decimal) -> (u32, u32) {
    let normalized = d.normalize();
    let decimals = normalized.scale();
    let mantissa = normalized.mantissa().unsigned_abs();
    let mantissa_digits = if mantissa == 0 {
        1
    } else {
        mantissa.ilog10() + 1
    };
    (mantissa_digits.max(decimals), decimals)
}

fn check_decimal(max_digits: Option<u32>, decimal_places: Option<u32>, d: &Decimal) -> Vec<Failure> {
    let mut failures = Vec::new();
    let (digits, decimals) = decimal_digits(d);
    if let Some(max) = max_digits {
        if digits > max {
            failures.push((
                ValidationErrorKind::MaxDigits,
                format!("Decimal input should have no more than {max} digits in total"),
            ));
        }
    }
    if let Some(places) = decimal_places {
        if decimals > places {
            failures.push((
                ValidationErrorKind::DecimalPlaces,
                format!("Decimal input should have no more than {places} decimal places"),
            ));
        }
    }
    if let (Some(max), Some(places)) = (max_digits, decimal_places) {
        let whole = digits.saturating_sub(decimals);
        let allowed = max.saturating_sub(places);
        if whole > allowed {
            failures.push((
                ValidationErrorKind::WholeDigits,
                format!("Decimal input should have no more than {allowed} digits before the decimal point"),
            ));
        }
    }
    failures
}
