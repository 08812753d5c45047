//! Minimal catalog introspection: which tables exist.

use sqlmodel_core::{Connection, Dialect, Result, Value};

/// Names of the user tables in the connected database, sorted.
pub fn table_names<C: Connection + ?Sized>(conn: &mut C) -> Result<Vec<String>> {
    let sql = match conn.dialect() {
        Dialect::Sqlite => {
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
        }
        Dialect::Postgres => {
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = current_schema() ORDER BY table_name"
        }
        Dialect::Mysql => {
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() ORDER BY table_name"
        }
    };
    let rows = conn.query(sql, &[])?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.get(0).and_then(Value::as_str).map(str::to_string))
        .collect())
}

/// True if `table` exists.
pub fn table_exists<C: Connection + ?Sized>(conn: &mut C, table: &str) -> Result<bool> {
    let dialect = conn.dialect();
    let sql = match dialect {
        Dialect::Sqlite => format!(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = {}",
            dialect.placeholder(1)
        ),
        Dialect::Postgres => format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = {}",
            dialect.placeholder(1)
        ),
        Dialect::Mysql => format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = {}",
            dialect.placeholder(1)
        ),
    };
    Ok(conn
        .query_one(&sql, &[Value::Text(table.to_string())])?
        .is_some())
}
