//! SQL expression tree.
//!
//! Expressions are built from column references and literal values and render
//! themselves for a [`Dialect`], collecting bound parameters as they go.
//!
//! ```ignore
//! let adults = hero.col("age")?.ge(18).and(hero.col("name")?.like("Spider%"));
//! let (sql, params) = adults.build_with_dialect(Dialect::Sqlite, 0);
//! ```

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use sqlmodel_core::{ColumnRef, Dialect, Value};
use uuid::Uuid;

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl BinaryOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Like => "LIKE",
            BinaryOp::NotLike => "NOT LIKE",
        }
    }
}

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A table-qualified column of a model.
    Column(ColumnRef),
    /// A bare column name, e.g. `Expr::col("age")`.
    Named(String),
    /// A bound parameter.
    Literal(Value),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        values: Vec<Value>,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Function call such as `count(...)`.
    Function { name: String, args: Vec<Expr> },
    /// Verbatim SQL.
    Raw(String),
}

impl Expr {
    /// Unqualified column by name.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Named(name.into())
    }

    /// Table-qualified column.
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::qualified(table, column))
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    /// `count(expr)`.
    pub fn count(expr: impl Into<Expr>) -> Self {
        Self::func("count", vec![expr.into()])
    }

    /// `count(*)`.
    pub fn count_all() -> Self {
        Self::func("count", vec![Expr::Raw("*".to_string())])
    }

    fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right.into()),
        }
    }

    /// `self = other`; comparing with a null literal renders `IS NULL`.
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        match other.into() {
            Expr::Literal(Value::Null) => self.is_null(),
            other => self.binary(BinaryOp::Eq, other),
        }
    }

    /// `self <> other`; comparing with a null literal renders `IS NOT NULL`.
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        match other.into() {
            Expr::Literal(Value::Null) => self.is_not_null(),
            other => self.binary(BinaryOp::Ne, other),
        }
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn like(self, pattern: impl Into<String>) -> Self {
        self.binary(BinaryOp::Like, Expr::Literal(Value::Text(pattern.into())))
    }

    pub fn not_like(self, pattern: impl Into<String>) -> Self {
        self.binary(BinaryOp::NotLike, Expr::Literal(Value::Text(pattern.into())))
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn in_list<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::InList {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in_list<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::InList {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// Conjunction; nested conjunctions are flattened.
    pub fn and(self, other: impl Into<Expr>) -> Self {
        let mut parts = match self {
            Expr::And(parts) => parts,
            other => vec![other],
        };
        match other.into() {
            Expr::And(more) => parts.extend(more),
            other => parts.push(other),
        }
        Expr::And(parts)
    }

    /// Disjunction; nested disjunctions are flattened.
    pub fn or(self, other: impl Into<Expr>) -> Self {
        let mut parts = match self {
            Expr::Or(parts) => parts,
            other => vec![other],
        };
        match other.into() {
            Expr::Or(more) => parts.extend(more),
            other => parts.push(other),
        }
        Expr::Or(parts)
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Conjunction of every expression; `None` when empty.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// Ascending sort key.
    pub fn asc(self) -> crate::clause::OrderBy {
        crate::clause::OrderBy::asc(self)
    }

    /// Descending sort key.
    pub fn desc(self) -> crate::clause::OrderBy {
        crate::clause::OrderBy::desc(self)
    }

    /// Render with the default dialect.
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default(), 0)
    }

    /// Render for `dialect`; placeholders are numbered after `offset`
    /// parameters already bound by the enclosing statement.
    pub fn build_with_dialect(&self, dialect: Dialect, offset: usize) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.write(dialect, offset, &mut params);
        (sql, params)
    }

    pub(crate) fn write(&self, dialect: Dialect, offset: usize, params: &mut Vec<Value>) -> String {
        match self {
            Expr::Column(col) => col.to_sql(dialect),
            Expr::Named(name) => dialect.quote_ident(name),
            Expr::Literal(value) => {
                params.push(value.clone());
                dialect.placeholder(offset + params.len())
            }
            Expr::Binary { left, op, right } => {
                let l = left.write_operand(dialect, offset, params);
                let r = right.write_operand(dialect, offset, params);
                format!("{l} {} {r}", op.as_str())
            }
            Expr::IsNull { expr, negated } => {
                let inner = expr.write_operand(dialect, offset, params);
                if *negated {
                    format!("{inner} IS NOT NULL")
                } else {
                    format!("{inner} IS NULL")
                }
            }
            Expr::InList {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    // x IN () is invalid SQL; render the constant result
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                let inner = expr.write_operand(dialect, offset, params);
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        params.push(v.clone());
                        dialect.placeholder(offset + params.len())
                    })
                    .collect();
                let op = if *negated { "NOT IN" } else { "IN" };
                format!("{inner} {op} ({})", placeholders.join(", "))
            }
            Expr::And(parts) => write_joined(parts, " AND ", dialect, offset, params),
            Expr::Or(parts) => write_joined(parts, " OR ", dialect, offset, params),
            Expr::Not(inner) => {
                format!("NOT ({})", inner.write(dialect, offset, params))
            }
            Expr::Function { name, args } => {
                let args: Vec<String> = args
                    .iter()
                    .map(|a| a.write(dialect, offset, params))
                    .collect();
                format!("{name}({})", args.join(", "))
            }
            Expr::Raw(sql) => sql.clone(),
        }
    }

    fn write_operand(&self, dialect: Dialect, offset: usize, params: &mut Vec<Value>) -> String {
        let sql = self.write(dialect, offset, params);
        if self.is_compound() {
            format!("({sql})")
        } else {
            sql
        }
    }

    fn is_compound(&self) -> bool {
        matches!(
            self,
            Expr::Binary { .. } | Expr::And(_) | Expr::Or(_) | Expr::IsNull { .. } | Expr::InList { .. }
        )
    }
}

fn write_joined(
    parts: &[Expr],
    sep: &str,
    dialect: Dialect,
    offset: usize,
    params: &mut Vec<Value>,
) -> String {
    let rendered: Vec<String> = parts
        .iter()
        .map(|p| {
            let sql = p.write(dialect, offset, params);
            if matches!(p, Expr::And(_) | Expr::Or(_)) {
                format!("({sql})")
            } else {
                sql
            }
        })
        .collect();
    rendered.join(sep)
}

impl From<ColumnRef> for Expr {
    fn from(col: ColumnRef) -> Self {
        Expr::Column(col)
    }
}

impl From<&ColumnRef> for Expr {
    fn from(col: &ColumnRef) -> Self {
        Expr::Column(col.clone())
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

macro_rules! impl_expr_from_literal {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Expr::Literal(Value::from(v))
                }
            }

            impl From<Option<$ty>> for Expr {
                fn from(v: Option<$ty>) -> Self {
                    Expr::Literal(Value::from(v))
                }
            }
        )*
    };
}

impl_expr_from_literal! {
    bool, i32, i64, u32, f64, Decimal, String, &str, Vec<u8>,
    NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hero(col: &str) -> Expr {
        Expr::qualified("hero", col)
    }

    #[test]
    fn test_comparison_binds_parameter() {
        let (sql, params) = hero("age").ge(18).build();
        assert_eq!(sql, "\"hero\".\"age\" >= $1");
        assert_eq!(params, vec![Value::BigInt(18)]);
    }

    #[test]
    fn test_eq_null_renders_is_null() {
        let (sql, params) = hero("age").eq(Value::Null).build();
        assert_eq!(sql, "\"hero\".\"age\" IS NULL");
        assert!(params.is_empty());

        let (sql, _) = hero("age").ne(None::<i64>).build();
        assert_eq!(sql, "\"hero\".\"age\" IS NOT NULL");
    }

    #[test]
    fn test_column_to_column() {
        let (sql, params) = hero("team_id").eq(Expr::qualified("team", "id")).build();
        assert_eq!(sql, "\"hero\".\"team_id\" = \"team\".\"id\"");
        assert!(params.is_empty());
    }

    #[test]
    fn test_and_or_nesting() {
        let expr = hero("age")
            .gt(30)
            .and(hero("name").eq("Rusty-Man").or(hero("name").eq("Deadpond")));
        let (sql, params) = expr.build_with_dialect(Dialect::Sqlite, 0);
        assert_eq!(
            sql,
            "\"hero\".\"age\" > ?1 AND (\"hero\".\"name\" = ?2 OR \"hero\".\"name\" = ?3)"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_and_flattens() {
        let expr = Expr::col("a").eq(1).and(Expr::col("b").eq(2)).and(Expr::col("c").eq(3));
        assert!(matches!(&expr, Expr::And(parts) if parts.len() == 3));
    }

    #[test]
    fn test_in_list_and_offset() {
        let (sql, params) = Expr::col("id")
            .in_list([1_i64, 2, 3])
            .build_with_dialect(Dialect::Postgres, 2);
        assert_eq!(sql, "\"id\" IN ($3, $4, $5)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_empty_in_list_is_false() {
        let (sql, params) = Expr::col("id").in_list(Vec::<i64>::new()).build();
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn test_not_and_like() {
        let (sql, _) = Expr::col("name").like("Spider%").not().build();
        assert_eq!(sql, "NOT (\"name\" LIKE $1)");
    }

    #[test]
    fn test_mysql_placeholders() {
        let (sql, _) = Expr::col("a")
            .eq(1)
            .and(Expr::col("b").lt(2))
            .build_with_dialect(Dialect::Mysql, 0);
        assert_eq!(sql, "`a` = ? AND `b` < ?");
    }

    #[test]
    fn test_count() {
        let (sql, _) = Expr::count(hero("id")).build();
        assert_eq!(sql, "count(\"hero\".\"id\")");
        assert_eq!(Expr::count_all().build().0, "count(*)");
    }

    #[test]
    fn test_all() {
        assert!(Expr::all(Vec::new()).is_none());
        let (sql, _) = Expr::all([Expr::col("a").eq(1), Expr::col("b").eq(2)])
            .unwrap()
            .build();
        assert_eq!(sql, "\"a\" = $1 AND \"b\" = $2");
    }
}
