//! Column synthesis.
//!
//! Turns a field's annotation and [`FieldInfo`] into a table [`Column`]:
//! storage type, nullability, keys, indexes and constraints. Declaration
//! contract violations are reported as [`Error::Config`]; annotations without
//! a storage mapping as [`Error::Synthesis`].

use crate::annotation::Annotation;
use crate::error::{Error, Result};
use crate::field::{Column, ColumnArg, FieldInfo, ForeignKey, ReferentialAction};
use crate::types::SqlType;
use crate::value::Value;

/// Storage type for a (non-optional) annotation.
///
/// Returns a message naming the annotation when there is no mapping.
pub fn storage_type(annotation: &Annotation, info: &FieldInfo) -> std::result::Result<SqlType, String> {
    let ty = match annotation {
        Annotation::Str | Annotation::IpAddr | Annotation::IpNetwork | Annotation::Path => {
            SqlType::AutoString {
                length: info.max_length.and_then(|n| u32::try_from(n).ok()),
            }
        }
        Annotation::Int => SqlType::Integer,
        Annotation::Float => SqlType::Float,
        Annotation::Bool => SqlType::Boolean,
        Annotation::DateTime => SqlType::DateTime,
        Annotation::Date => SqlType::Date,
        Annotation::Time => SqlType::Time,
        Annotation::Duration => SqlType::Interval,
        Annotation::Bytes => SqlType::LargeBinary,
        Annotation::Decimal => SqlType::Numeric {
            precision: info.max_digits,
            scale: info.decimal_places,
        },
        Annotation::Uuid => SqlType::Uuid,
        Annotation::Enum(def) => SqlType::Enum {
            name: def.name.clone(),
            variants: def.variants.clone(),
        },
        other => {
            return Err(format!(
                "'{other}' has no SQL storage type; pass sa_type to choose one"
            ));
        }
    };
    Ok(ty)
}

/// Nullability of a synthesized column.
///
/// An explicit `nullable` wins; primary keys are never nullable; otherwise the
/// column is nullable iff the annotation admits none or the default is none.
#[must_use]
pub fn is_nullable(annotation: &Annotation, info: &FieldInfo) -> bool {
    if let Some(explicit) = info.nullable {
        return explicit;
    }
    if info.primary_key == Some(true) {
        return false;
    }
    annotation.admits_none() || info.default.is_null()
}

/// Checks that hold for every field declaration, table or not.
pub fn check_field_declaration(model: &str, name: &str, info: &FieldInfo) -> Result<()> {
    let conflicts = info.options_conflicting_with_sa_column();
    if !conflicts.is_empty() {
        return Err(Error::Config(format!(
            "{model}.{name}: passing {} is not supported when also passing a sa_column",
            conflicts.join(", ")
        )));
    }
    if info.ondelete.is_some() && info.foreign_key.is_none() {
        return Err(Error::Config(format!(
            "{model}.{name}: ondelete can only be used together with foreign_key"
        )));
    }
    if let Some(pattern) = &info.regex {
        if let Some(message) = crate::validate::validate_pattern(pattern) {
            return Err(Error::Config(format!("{model}.{name}: {message}")));
        }
    }
    Ok(())
}

/// Synthesize the table column for one field of a table model.
pub fn synthesize_column(model: &str, name: &str, annotation: &Annotation, info: &FieldInfo) -> Result<Column> {
    check_field_declaration(model, name, info)?;

    if let Some(explicit) = &info.sa_column {
        let mut column = explicit.clone();
        if column.name.is_empty() {
            column.name = name.to_string();
        }
        return Ok(column);
    }

    let sql_type = match &info.sa_type {
        Some(ty) => ty.clone(),
        None => {
            let inner = annotation
                .unwrap_optional()
                .map_err(|m| Error::Config(format!("{model}.{name}: cannot map {m} to a SQL column")))?;
            storage_type(inner, info).map_err(|message| Error::Synthesis {
                model: model.to_string(),
                field: name.to_string(),
                message,
            })?
        }
    };

    let primary_key = info.primary_key.unwrap_or(false);
    let nullable = is_nullable(annotation, info);
    if info.ondelete == Some(ReferentialAction::SetNull) && !nullable {
        return Err(Error::Config(format!(
            "{model}.{name}: ondelete='SET NULL' requires a nullable column"
        )));
    }

    let mut column = Column::new(sql_type).named(name).nullable(nullable);
    column.primary_key = primary_key;
    column.unique = info.unique.unwrap_or(false);
    column.index = info.index.unwrap_or(false);

    if let Some(target) = &info.foreign_key {
        let fk = ForeignKey::parse(target, info.ondelete)
            .map_err(|m| Error::Config(format!("{model}.{name}: {m}")))?;
        column.foreign_keys.push(fk);
    }

    for arg in info.sa_column_args.iter().flatten() {
        match arg {
            ColumnArg::ForeignKey { target, ondelete } => {
                let fk = ForeignKey::parse(target, *ondelete)
                    .map_err(|m| Error::Config(format!("{model}.{name}: {m}")))?;
                column.foreign_keys.push(fk);
            }
            ColumnArg::Check(expr) => column.checks.push(expr.clone()),
        }
    }

    for (key, value) in info.sa_column_kwargs.iter().flatten() {
        apply_column_kwarg(&mut column, model, name, key, value)?;
    }

    tracing::trace!(
        model = model,
        field = name,
        sql_type = ?column.sql_type,
        nullable = column.nullable,
        primary_key = column.primary_key,
        "Synthesized column"
    );
    Ok(column)
}

fn apply_column_kwarg(column: &mut Column, model: &str, name: &str, key: &str, value: &Value) -> Result<()> {
    let bad_value = || {
        Error::Config(format!(
            "{model}.{name}: sa_column_kwargs['{key}'] has an unsupported value {value}"
        ))
    };
    let as_bool = || value.as_bool().ok_or_else(bad_value);
    match key {
        "name" => column.name = value.as_str().ok_or_else(bad_value)?.to_string(),
        "comment" => column.comment = Some(value.as_str().ok_or_else(bad_value)?.to_string()),
        "server_default" => {
            column.server_default = Some(match value {
                Value::Text(sql) => sql.clone(),
                Value::Null => return Err(bad_value()),
                other => other.to_string(),
            });
        }
        "autoincrement" => column.autoincrement = Some(as_bool()?),
        "unique" => column.unique = as_bool()?,
        "index" => column.index = as_bool()?,
        "nullable" => column.nullable = as_bool()?,
        "primary_key" => {
            column.primary_key = as_bool()?;
            if column.primary_key {
                column.nullable = false;
            }
        }
        other => {
            return Err(Error::Config(format!(
                "{model}.{name}: unsupported sa_column_kwargs key '{other}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use rstest::rstest;

    #[rstest]
    #[case(Annotation::Str, SqlType::AutoString { length: None })]
    #[case(Annotation::Int, SqlType::Integer)]
    #[case(Annotation::Float, SqlType::Float)]
    #[case(Annotation::Bool, SqlType::Boolean)]
    #[case(Annotation::DateTime, SqlType::DateTime)]
    #[case(Annotation::Date, SqlType::Date)]
    #[case(Annotation::Time, SqlType::Time)]
    #[case(Annotation::Duration, SqlType::Interval)]
    #[case(Annotation::Bytes, SqlType::LargeBinary)]
    #[case(Annotation::Decimal, SqlType::Numeric { precision: None, scale: None })]
    #[case(Annotation::Uuid, SqlType::Uuid)]
    #[case(Annotation::IpAddr, SqlType::AutoString { length: None })]
    #[case(Annotation::Path, SqlType::AutoString { length: None })]
    fn test_storage_type_table(#[case] ann: Annotation, #[case] expected: SqlType) {
        assert_eq!(storage_type(&ann, &Field::new()), Ok(expected));
    }

    #[test]
    fn test_max_length_and_decimal_precision_flow_into_type() {
        let f = Field::new().max_length(40);
        assert_eq!(storage_type(&Annotation::Str, &f), Ok(SqlType::AutoString { length: Some(40) }));
        let f = Field::new().max_digits(4).decimal_places(2);
        assert_eq!(
            storage_type(&Annotation::Decimal, &f),
            Ok(SqlType::Numeric { precision: Some(4), scale: Some(2) })
        );
    }

    #[rstest]
    #[case(Annotation::Int, Field::new(), false)]
    #[case(Annotation::optional(Annotation::Int), Field::new(), true)]
    #[case(Annotation::Int, Field::new().default(Value::Null), true)]
    #[case(Annotation::optional(Annotation::Int), Field::new().primary_key(true), false)]
    #[case(Annotation::optional(Annotation::Int), Field::new().nullable(false), false)]
    #[case(Annotation::Str, Field::new().nullable(true), true)]
    fn test_nullability(#[case] ann: Annotation, #[case] field: FieldInfo, #[case] expected: bool) {
        assert_eq!(is_nullable(&ann, &field), expected);
    }

    #[test]
    fn test_sa_column_with_primary_key_raises() {
        let f = Field::new()
            .sa_column(Column::new(SqlType::Integer))
            .primary_key(true);
        let err = synthesize_column("Hero", "id", &Annotation::Int, &f).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("primary_key")));
    }

    #[test]
    fn test_sa_column_used_verbatim() {
        let f = Field::new().sa_column(Column::new(SqlType::BigInteger).unique(true));
        let col = synthesize_column("Hero", "power", &Annotation::Int, &f).unwrap();
        assert_eq!(col.name, "power");
        assert_eq!(col.sql_type, SqlType::BigInteger);
        assert!(col.unique);
    }

    #[test]
    fn test_ondelete_without_foreign_key() {
        let f = Field::new().ondelete(ReferentialAction::Cascade);
        let err = synthesize_column("Hero", "team_id", &Annotation::Int, &f).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_set_null_requires_nullable() {
        let f = Field::new()
            .foreign_key("team.id")
            .ondelete(ReferentialAction::SetNull);
        assert!(synthesize_column("Hero", "team_id", &Annotation::Int, &f).is_err());
        assert!(synthesize_column("Hero", "team_id", &Annotation::optional(Annotation::Int), &f).is_ok());
    }

    #[test]
    fn test_union_of_two_types_is_config_error() {
        let ann = Annotation::union([Annotation::Int, Annotation::Str]);
        let err = synthesize_column("Hero", "x", &ann, &Field::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_list_without_sa_type_is_synthesis_error() {
        let ann = Annotation::list(Annotation::Str);
        let err = synthesize_column("Hero", "tags", &ann, &Field::new()).unwrap_err();
        assert!(matches!(err, Error::Synthesis { ref field, .. } if field == "tags"));

        let f = Field::new().sa_type(SqlType::Json);
        let col = synthesize_column("Hero", "tags", &ann, &f).unwrap();
        assert_eq!(col.sql_type, SqlType::Json);
    }

    #[test]
    fn test_column_kwargs() {
        let f = Field::new()
            .default(0)
            .sa_column_kwarg("server_default", "0")
            .sa_column_kwarg("comment", "points scored")
            .sa_column_kwarg("name", "pts");
        let col = synthesize_column("Hero", "points", &Annotation::Int, &f).unwrap();
        assert_eq!(col.name, "pts");
        assert_eq!(col.server_default.as_deref(), Some("0"));
        assert_eq!(col.comment.as_deref(), Some("points scored"));

        let f = Field::new().sa_column_kwarg("collation", "nocase");
        assert!(synthesize_column("Hero", "name", &Annotation::Str, &f).is_err());
    }

    #[test]
    fn test_column_args_add_foreign_keys_and_checks() {
        let f = Field::new().sa_column_args(vec![
            ColumnArg::ForeignKey {
                target: "team.id".into(),
                ondelete: Some(ReferentialAction::Cascade),
            },
            ColumnArg::Check("team_id > 0".into()),
        ]);
        let col = synthesize_column("Hero", "team_id", &Annotation::optional(Annotation::Int), &f).unwrap();
        assert_eq!(col.foreign_keys.len(), 1);
        assert_eq!(col.foreign_keys[0].ondelete, Some(ReferentialAction::Cascade));
        assert_eq!(col.checks, vec!["team_id > 0".to_string()]);
    }

    #[test]
    fn test_invalid_regex_rejected_at_declaration() {
        let f = Field::new().regex("[unclosed");
        assert!(check_field_declaration("Hero", "name", &f).is_err());
    }
}
