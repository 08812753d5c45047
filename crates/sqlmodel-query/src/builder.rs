//! INSERT, UPDATE and DELETE statements.
//!
//! These are the statements a session issues while flushing: one INSERT per
//! new instance, an UPDATE of the changed columns per modified instance, and
//! DELETEs keyed on primary keys or link-table columns.
//!
//! Builders work on table and column names plus bound [`Value`]s; the session
//! translates instances into those before flushing.

use crate::expr::Expr;
use sqlmodel_core::{Dialect, Value};

/// INSERT query builder.
///
/// # Example
///
/// ```ignore
/// let (sql, params) = InsertBuilder::new("hero")
///     .value("name", "Deadpond")
///     .value("secret_name", "Dive Wilson")
///     .build_with_dialect(Dialect::Sqlite);
/// ```
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    columns: Vec<String>,
    values: Vec<Value>,
}

impl InsertBuilder {
    /// Create a new INSERT builder for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Add one column value.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into());
        self
    }

    /// Build the INSERT SQL and parameters with default dialect (Postgres).
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the INSERT SQL and parameters with specific dialect.
    ///
    /// With no columns every value comes from the table defaults.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let table = dialect.quote_ident(&self.table);

        let sql = if self.columns.is_empty() {
            match dialect {
                Dialect::Mysql => format!("INSERT INTO {table} () VALUES ()"),
                Dialect::Postgres | Dialect::Sqlite => format!("INSERT INTO {table} DEFAULT VALUES"),
            }
        } else {
            let columns: Vec<String> = self.columns.iter().map(|c| dialect.quote_ident(c)).collect();
            let placeholders: Vec<String> =
                (1..=self.values.len()).map(|i| dialect.placeholder(i)).collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        (sql, self.values.clone())
    }
}

/// A single SET clause in an UPDATE.
#[derive(Debug, Clone)]
struct SetClause {
    column: String,
    value: Value,
}

/// UPDATE query builder.
///
/// # Example
///
/// ```ignore
/// let (sql, params) = UpdateBuilder::new("hero")
///     .set("age", 30)
///     .filter(Expr::col("id").eq(1))
///     .build_with_dialect(Dialect::Sqlite);
/// ```
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    sets: Vec<SetClause>,
    where_clause: Option<Expr>,
}

impl UpdateBuilder {
    /// Create a new UPDATE builder for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            where_clause: None,
        }
    }

    /// Set a column to a value. A later call for the same column replaces
    /// the earlier one.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.sets.iter_mut().find(|s| s.column == column) {
            Some(existing) => existing.value = value,
            None => self.sets.push(SetClause { column, value }),
        }
        self
    }

    /// Add a WHERE condition; repeated calls are ANDed.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// True if no column would be updated.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Build the UPDATE SQL and parameters with default dialect (Postgres).
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the UPDATE SQL and parameters with specific dialect.
    ///
    /// Returns an empty statement when nothing is set.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        if self.sets.is_empty() {
            return (String::new(), Vec::new());
        }

        let mut params = Vec::with_capacity(self.sets.len());
        let set_clauses: Vec<String> = self
            .sets
            .iter()
            .map(|s| {
                params.push(s.value.clone());
                format!(
                    "{} = {}",
                    dialect.quote_ident(&s.column),
                    dialect.placeholder(params.len())
                )
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_ident(&self.table),
            set_clauses.join(", ")
        );

        if let Some(where_clause) = &self.where_clause {
            let (where_sql, where_params) = where_clause.build_with_dialect(dialect, params.len());
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params.extend(where_params);
        }

        (sql, params)
    }
}

/// DELETE query builder.
///
/// # Example
///
/// ```ignore
/// let (sql, params) = DeleteBuilder::new("heroteamlink")
///     .filter(Expr::col("hero_id").eq(1))
///     .build_with_dialect(Dialect::Sqlite);
/// ```
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    where_clause: Option<Expr>,
}

impl DeleteBuilder {
    /// Create a new DELETE builder for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
        }
    }

    /// Add a WHERE condition; repeated calls are ANDed.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Build the DELETE SQL and parameters with default dialect (Postgres).
    pub fn build(&self) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the DELETE SQL and parameters with specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", dialect.quote_ident(&self.table));
        let mut params = Vec::new();

        if let Some(where_clause) = &self.where_clause {
            let (where_sql, where_params) = where_clause.build_with_dialect(dialect, 0);
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            params = where_params;
        }

        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hero_insert() -> InsertBuilder {
        InsertBuilder::new("hero")
            .value("name", "Deadpond")
            .value("age", 25)
    }

    #[test]
    fn test_insert_basic() {
        let (sql, params) = hero_insert().build();

        assert_eq!(sql, "INSERT INTO \"hero\" (\"name\", \"age\") VALUES ($1, $2)");
        assert_eq!(params, vec![Value::from("Deadpond"), Value::BigInt(25)]);
    }

    #[test]
    fn test_insert_default_values() {
        let (sql, params) = InsertBuilder::new("hero").build_with_dialect(Dialect::Sqlite);
        assert_eq!(sql, "INSERT INTO \"hero\" DEFAULT VALUES");
        assert!(params.is_empty());

        let (sql, _) = InsertBuilder::new("hero").build_with_dialect(Dialect::Mysql);
        assert_eq!(sql, "INSERT INTO `hero` () VALUES ()");
    }

    #[test]
    fn test_update_explicit_set() {
        let (sql, params) = UpdateBuilder::new("hero")
            .set("age", 30)
            .filter(Expr::col("id").eq(1))
            .build_with_dialect(Dialect::Postgres);

        assert_eq!(sql, "UPDATE \"hero\" SET \"age\" = $1 WHERE \"id\" = $2");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_update_set_replaces() {
        let builder = UpdateBuilder::new("hero").set("age", 30).set("age", 31);
        let (sql, params) = builder.build();
        assert_eq!(sql, "UPDATE \"hero\" SET \"age\" = $1");
        assert_eq!(params, vec![Value::BigInt(31)]);
    }

    #[test]
    fn test_update_empty() {
        let builder = UpdateBuilder::new("hero").filter(Expr::col("id").eq(1));
        assert!(builder.is_empty());
        assert_eq!(builder.build(), (String::new(), Vec::new()));
    }

    #[test]
    fn test_update_to_null() {
        let (sql, params) = UpdateBuilder::new("hero")
            .set("team_id", Value::Null)
            .filter(Expr::col("team_id").eq(3))
            .build_with_dialect(Dialect::Sqlite);
        assert_eq!(sql, "UPDATE \"hero\" SET \"team_id\" = ?1 WHERE \"team_id\" = ?2");
        assert_eq!(params, vec![Value::Null, Value::BigInt(3)]);
    }

    #[test]
    fn test_delete_basic() {
        let (sql, _) = DeleteBuilder::new("hero")
            .filter(Expr::col("age").lt(18))
            .build_with_dialect(Dialect::Postgres);

        assert_eq!(sql, "DELETE FROM \"hero\" WHERE \"age\" < $1");
    }

    #[test]
    fn test_delete_composite_key() {
        let (sql, params) = DeleteBuilder::new("heroteamlink")
            .filter(Expr::col("hero_id").eq(1))
            .filter(Expr::col("team_id").eq(2))
            .build_with_dialect(Dialect::Sqlite);

        assert_eq!(
            sql,
            "DELETE FROM \"heroteamlink\" WHERE \"hero_id\" = ?1 AND \"team_id\" = ?2"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_dialect_placeholders() {
        let (sql, _) = hero_insert().build_with_dialect(Dialect::Sqlite);
        assert!(sql.contains("?1"));
        assert!(sql.contains("?2"));

        let (sql, _) = hero_insert().build_with_dialect(Dialect::Mysql);
        assert_eq!(sql, "INSERT INTO `hero` (`name`, `age`) VALUES (?, ?)");
    }
}
