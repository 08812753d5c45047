//! Database connection contract.
//!
//! Drivers implement [`Connection`]; the schema and session layers only talk
//! to this trait. Calls are blocking: the async session moves them onto a
//! blocking worker instead of requiring an async driver.

use crate::error::Result;
use crate::row::Row;
use crate::types::Dialect;
use crate::value::Value;

/// A blocking database connection.
pub trait Connection: Send {
    /// SQL dialect spoken by this connection.
    fn dialect(&self) -> Dialect;

    /// Execute a statement and return the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and return all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return the first row, if any.
    fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute an INSERT and return the id generated for the new row.
    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Execute several `;`-separated statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    fn begin(&mut self) -> Result<()> {
        self.execute("BEGIN", &[]).map(|_| ())
    }

    fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT", &[]).map(|_| ())
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK", &[]).map(|_| ())
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        (**self).query_one(sql, params)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        (**self).insert(sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        (**self).execute_batch(sql)
    }

    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        statements: Vec<String>,
    }

    impl Connection for Recorder {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<u64> {
            self.statements.push(sql.to_string());
            Ok(0)
        }

        fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            self.statements.push(sql.to_string());
            Ok(Vec::new())
        }

        fn insert(&mut self, sql: &str, _params: &[Value]) -> Result<i64> {
            self.statements.push(sql.to_string());
            Ok(1)
        }

        fn execute_batch(&mut self, sql: &str) -> Result<()> {
            self.statements.push(sql.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_transaction_defaults_issue_statements() {
        let mut conn = Recorder::default();
        conn.begin().unwrap();
        conn.commit().unwrap();
        conn.rollback().unwrap();
        assert_eq!(conn.statements, vec!["BEGIN", "COMMIT", "ROLLBACK"]);
    }

    #[test]
    fn test_boxed_connection_forwards() {
        let mut conn: Box<dyn Connection> = Box::new(Recorder::default());
        assert_eq!(conn.dialect(), Dialect::Sqlite);
        assert!(conn.query_one("SELECT 1", &[]).unwrap().is_none());
        assert_eq!(conn.insert("INSERT", &[]).unwrap(), 1);
    }
}
