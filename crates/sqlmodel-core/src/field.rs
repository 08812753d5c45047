//! Field declarations and column definitions.
//!
//! [`FieldInfo`] (built with `Field::new()`) is what a model author writes for
//! a column-backed attribute. The synthesizer turns it, together with the
//! attribute's annotation, into a [`Column`].

use std::fmt;
use std::sync::Arc;

use crate::types::{Dialect, SqlType};
use crate::value::Value;

/// Referential action for foreign key constraints (ON DELETE / ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// No action - raise error if any references exist.
    #[default]
    NoAction,
    Restrict,
    /// Delete referencing rows.
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse a referential action from a string (case-insensitive).
    ///
    /// Returns `None` if the string is not a recognized action.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NO ACTION" | "NOACTION" | "NO_ACTION" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" | "SETNULL" | "SET_NULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" | "SETDEFAULT" | "SET_DEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }
}

/// Produces a fresh default value for each new instance.
pub type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Default of a declared field.
#[derive(Clone, Default)]
pub enum FieldDefault {
    /// No default: the field must be supplied.
    #[default]
    Required,
    Value(Value),
    Factory(DefaultFactory),
}

impl FieldDefault {
    #[must_use]
    pub fn is_required(&self) -> bool {
        matches!(self, FieldDefault::Required)
    }

    /// True if the default is the null value.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, FieldDefault::Value(Value::Null))
    }

    /// A value for a new instance, or `None` if the field is required.
    #[must_use]
    pub fn produce(&self) -> Option<Value> {
        match self {
            FieldDefault::Required => None,
            FieldDefault::Value(v) => Some(v.clone()),
            FieldDefault::Factory(f) => Some(f()),
        }
    }
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDefault::Required => f.write_str("Required"),
            FieldDefault::Value(v) => f.debug_tuple("Value").field(v).finish(),
            FieldDefault::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Extra positional arguments for a synthesized column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnArg {
    /// An additional foreign key, `"table.column"`.
    ForeignKey {
        target: String,
        ondelete: Option<ReferentialAction>,
    },
    /// A column-level CHECK constraint expression.
    Check(String),
}

/// Declaration of a column-backed (or plain data) attribute.
///
/// Boolean column options are tri-state: `None` means "not supplied", which is
/// distinct from an explicit `false`.
#[derive(Debug, Clone, Default)]
pub struct FieldInfo {
    pub default: FieldDefault,
    pub primary_key: Option<bool>,
    /// Foreign key target, `"table.column"`.
    pub foreign_key: Option<String>,
    pub ondelete: Option<ReferentialAction>,
    pub unique: Option<bool>,
    pub index: Option<bool>,
    pub nullable: Option<bool>,
    /// Storage type override.
    pub sa_type: Option<SqlType>,
    /// Complete column override; excludes every other column option.
    pub sa_column: Option<Column>,
    pub sa_column_args: Option<Vec<ColumnArg>>,
    pub sa_column_kwargs: Option<Vec<(String, Value)>>,
    pub max_length: Option<usize>,
    pub min_length: Option<usize>,
    pub regex: Option<String>,
    pub gt: Option<f64>,
    pub ge: Option<f64>,
    pub lt: Option<f64>,
    pub le: Option<f64>,
    pub max_digits: Option<u32>,
    pub decimal_places: Option<u32>,
    /// Name used for input and output instead of the attribute name.
    pub alias: Option<String>,
    pub description: Option<String>,
    /// Never include this field in `model_dump`.
    pub exclude: bool,
}

/// Builder entry point: `Field::new().primary_key(true)`.
pub type Field = FieldInfo;

impl FieldInfo {
    /// An empty declaration: required, no column options.
    #[must_use]
    pub fn new() -> Self {
        <Self as Default>::default()
    }

    /// Constant default.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = FieldDefault::Value(value.into());
        self
    }

    /// Default produced per instance.
    pub fn default_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = FieldDefault::Factory(Arc::new(factory));
        self
    }

    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = Some(value);
        self
    }

    pub fn foreign_key(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    pub fn ondelete(mut self, action: ReferentialAction) -> Self {
        self.ondelete = Some(action);
        self
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = Some(value);
        self
    }

    pub fn index(mut self, value: bool) -> Self {
        self.index = Some(value);
        self
    }

    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = Some(value);
        self
    }

    pub fn sa_type(mut self, ty: SqlType) -> Self {
        self.sa_type = Some(ty);
        self
    }

    pub fn sa_column(mut self, column: Column) -> Self {
        self.sa_column = Some(column);
        self
    }

    pub fn sa_column_args(mut self, args: Vec<ColumnArg>) -> Self {
        self.sa_column_args = Some(args);
        self
    }

    /// Add one column keyword argument.
    pub fn sa_column_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sa_column_kwargs
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn regex(mut self, pattern: impl Into<String>) -> Self {
        self.regex = Some(pattern.into());
        self
    }

    pub fn gt(mut self, bound: f64) -> Self {
        self.gt = Some(bound);
        self
    }

    pub fn ge(mut self, bound: f64) -> Self {
        self.ge = Some(bound);
        self
    }

    pub fn lt(mut self, bound: f64) -> Self {
        self.lt = Some(bound);
        self
    }

    pub fn le(mut self, bound: f64) -> Self {
        self.le = Some(bound);
        self
    }

    pub fn max_digits(mut self, n: u32) -> Self {
        self.max_digits = Some(n);
        self
    }

    pub fn decimal_places(mut self, n: u32) -> Self {
        self.decimal_places = Some(n);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn exclude(mut self, value: bool) -> Self {
        self.exclude = value;
        self
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.default.is_required()
    }

    /// Name used in dumps with `by_alias`.
    #[must_use]
    pub fn output_name<'a>(&'a self, attribute: &'a str) -> &'a str {
        self.alias.as_deref().unwrap_or(attribute)
    }

    /// Column options supplied alongside `sa_column`, by name.
    ///
    /// `sa_column` must stand alone; any name returned here is a declaration
    /// error.
    #[must_use]
    pub fn options_conflicting_with_sa_column(&self) -> Vec<&'static str> {
        if self.sa_column.is_none() {
            return Vec::new();
        }
        let mut conflicts = Vec::new();
        if self.primary_key.is_some() {
            conflicts.push("primary_key");
        }
        if self.nullable.is_some() {
            conflicts.push("nullable");
        }
        if self.foreign_key.is_some() {
            conflicts.push("foreign_key");
        }
        if self.ondelete.is_some() {
            conflicts.push("ondelete");
        }
        if self.unique.is_some() {
            conflicts.push("unique");
        }
        if self.index.is_some() {
            conflicts.push("index");
        }
        if self.sa_type.is_some() {
            conflicts.push("sa_type");
        }
        if self.sa_column_args.is_some() {
            conflicts.push("sa_column_args");
        }
        if self.sa_column_kwargs.is_some() {
            conflicts.push("sa_column_kwargs");
        }
        conflicts
    }
}

/// A foreign key on a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub ondelete: Option<ReferentialAction>,
}

impl ForeignKey {
    /// Parse `"table.column"`.
    pub fn parse(target: &str, ondelete: Option<ReferentialAction>) -> Result<Self, String> {
        match target.rsplit_once('.') {
            Some((table, column)) if !table.is_empty() && !column.is_empty() => Ok(Self {
                table: table.to_string(),
                column: column.to_string(),
                ondelete,
            }),
            _ => Err(format!(
                "foreign key '{target}' must have the form 'table.column'"
            )),
        }
    }

    #[must_use]
    pub fn target(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

/// A table column definition.
///
/// Produced by synthesis, or supplied verbatim through `sa_column`.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name; empty means "use the attribute name".
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    /// `None` means "auto": single integer primary keys autoincrement.
    pub autoincrement: Option<bool>,
    pub unique: bool,
    pub index: bool,
    pub foreign_keys: Vec<ForeignKey>,
    /// SQL text of the server-side default.
    pub server_default: Option<String>,
    pub comment: Option<String>,
    pub checks: Vec<String>,
}

impl Column {
    /// A nullable column of `sql_type`.
    #[must_use]
    pub fn new(sql_type: SqlType) -> Self {
        Self {
            name: String::new(),
            sql_type,
            nullable: true,
            primary_key: false,
            autoincrement: None,
            unique: false,
            index: false,
            foreign_keys: Vec::new(),
            server_default: None,
            comment: None,
            checks: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Mark as primary key; primary keys are never nullable.
    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        if value {
            self.nullable = false;
        }
        self
    }

    pub fn autoincrement(mut self, value: bool) -> Self {
        self.autoincrement = Some(value);
        self
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub fn index(mut self, value: bool) -> Self {
        self.index = value;
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn server_default(mut self, sql: impl Into<String>) -> Self {
        self.server_default = Some(sql.into());
        self
    }

    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    pub fn check(mut self, expr: impl Into<String>) -> Self {
        self.checks.push(expr.into());
        self
    }
}

/// A column reference used in queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: String,
    pub name: String,
    /// Attribute the column backs, when it belongs to a model.
    pub field: Option<String>,
    /// Storage type, used to decode selected values.
    pub sql_type: Option<SqlType>,
}

impl ColumnRef {
    /// Create a column reference with table prefix.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            field: None,
            sql_type: None,
        }
    }

    /// Generate SQL for this column reference.
    #[must_use]
    pub fn to_sql(&self, dialect: Dialect) -> String {
        format!(
            "{}.{}",
            dialect.quote_ident(&self.table),
            dialect.quote_ident(&self.name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referential_action_parse() {
        assert_eq!(
            ReferentialAction::from_str("set null"),
            Some(ReferentialAction::SetNull)
        );
        assert_eq!(ReferentialAction::from_str("bogus"), None);
        assert_eq!(ReferentialAction::Cascade.as_sql(), "CASCADE");
    }

    #[test]
    fn test_tristate_options_default_to_unsupplied() {
        let f = Field::new();
        assert!(f.primary_key.is_none());
        assert!(f.nullable.is_none());
        assert!(f.is_required());
        let f = Field::new().primary_key(false);
        assert_eq!(f.primary_key, Some(false));
    }

    #[test]
    fn test_sa_column_conflicts_listed() {
        let f = Field::new()
            .sa_column(Column::new(SqlType::Integer))
            .primary_key(true)
            .index(false);
        assert_eq!(f.options_conflicting_with_sa_column(), vec!["primary_key", "index"]);

        let f = Field::new().sa_column(Column::new(SqlType::Integer)).default(1);
        assert!(f.options_conflicting_with_sa_column().is_empty());
    }

    #[test]
    fn test_default_factory_runs_each_time() {
        use std::sync::atomic::{AtomicI64, Ordering};
        let counter = Arc::new(AtomicI64::new(0));
        let c = Arc::clone(&counter);
        let f = Field::new().default_factory(move || Value::BigInt(c.fetch_add(1, Ordering::SeqCst)));
        assert_eq!(f.default.produce(), Some(Value::BigInt(0)));
        assert_eq!(f.default.produce(), Some(Value::BigInt(1)));
    }

    #[test]
    fn test_foreign_key_parse() {
        let fk = ForeignKey::parse("team.id", None).unwrap();
        assert_eq!(fk.table, "team");
        assert_eq!(fk.column, "id");
        assert!(ForeignKey::parse("team", None).is_err());
    }

    #[test]
    fn test_column_primary_key_not_nullable() {
        let c = Column::new(SqlType::Integer).primary_key(true);
        assert!(!c.nullable);
    }
}
