//! `Connection` implementation over `rusqlite`.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::ValueRef;
use sqlmodel_core::{Connection, Dialect, Error, Result, Row, Value};

use crate::config::SqliteConfig;

/// A connection to one SQLite database.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    config: SqliteConfig,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn db_error(context: &str, err: &rusqlite::Error) -> Error {
    Error::Database(format!("{context}: {err}"))
}

impl SqliteConnection {
    /// Open the database described by `config`.
    pub fn connect(config: &SqliteConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => rusqlite::Connection::open(path),
            None => rusqlite::Connection::open_in_memory(),
        }
        .map_err(|e| db_error("SQLite open failed", &e))?;

        conn.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))
            .map_err(|e| db_error("Failed to set busy timeout", &e))?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)
            .map_err(|e| db_error("Failed to set pragmas", &e))?;

        tracing::debug!(
            path = ?config.path,
            foreign_keys = config.foreign_keys,
            "Opened SQLite connection"
        );
        Ok(Self {
            conn,
            config: config.clone(),
        })
    }

    /// Open a private in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::connect(&SqliteConfig::memory())
    }

    #[must_use]
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Binds `Value`s to a prepared statement, 1-based.
    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, i64::from(*b)),
                Value::BigInt(v) => stmt.raw_bind_parameter(idx, v),
                Value::Double(v) => stmt.raw_bind_parameter(idx, v),
                Value::Decimal(d) => stmt.raw_bind_parameter(idx, d.to_string()),
                Value::Text(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Date(d) => stmt.raw_bind_parameter(idx, d.format("%Y-%m-%d").to_string()),
                Value::Time(t) => stmt.raw_bind_parameter(idx, t.format("%H:%M:%S%.f").to_string()),
                Value::Timestamp(ts) => {
                    stmt.raw_bind_parameter(idx, ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
                }
                Value::Interval(d) => {
                    stmt.raw_bind_parameter(idx, d.num_microseconds().unwrap_or(i64::MAX))
                }
                Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.simple().to_string()),
                Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string()),
            }
            .map_err(|e| db_error("Bind error", &e))?;
        }
        Ok(())
    }

    /// Converts a `rusqlite::Row` to a generic `Row`.
    fn convert_row(sqlite_row: &rusqlite::Row<'_>, columns: &Arc<[String]>) -> Result<Row> {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value = match sqlite_row.get_ref(i).map_err(|e| db_error("Read error", &e))? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::BigInt(v),
                ValueRef::Real(v) => Value::Double(v),
                ValueRef::Text(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
                ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
            };
            values.push(value);
        }
        Ok(Row::new(Arc::clone(columns), values))
    }

    fn prepare(&self, sql: &str) -> Result<rusqlite::Statement<'_>> {
        self.conn
            .prepare(sql)
            .map_err(|e| Error::Database(format!("{e} [{sql}]")))
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql = %sql, params = params.len(), "execute");
        let mut stmt = self.prepare(sql)?;
        Self::bind_params(&mut stmt, params)?;
        let count = stmt
            .raw_execute()
            .map_err(|e| Error::Database(format!("{e} [{sql}]")))?;
        Ok(count as u64)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql = %sql, params = params.len(), "query");
        let mut stmt = self.prepare(sql)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        Self::bind_params(&mut stmt, params)?;

        let mut raw_rows = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows
            .next()
            .map_err(|e| Error::Database(format!("{e} [{sql}]")))?
        {
            rows.push(Self::convert_row(row, &columns)?);
        }
        Ok(rows)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        self.execute(sql, params)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        tracing::trace!(sql = %sql, "execute_batch");
        self.conn
            .execute_batch(sql)
            .map_err(|e| db_error("Batch error", &e))
    }
}
