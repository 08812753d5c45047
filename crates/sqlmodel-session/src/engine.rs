//! Engines: where sessions get their connection from.
//!
//! `sqlite://` (or `sqlite:///:memory:`) opens one in-memory database that
//! every session of the engine shares. `sqlite:///path/to/file.db` opens the
//! file; each [`Engine::connect`] call gets its own connection.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sqlmodel_core::{Connection, Dialect, Error, MetaData, Result, Row, Value};
use sqlmodel_sqlite::{SqliteConfig, SqliteConnection};

/// A connection shared between an engine and its sessions.
pub type SharedConnection = Arc<Mutex<Box<dyn Connection>>>;

/// Lock a shared connection, recovering from poisoning.
pub fn lock_connection(conn: &SharedConnection) -> MutexGuard<'_, Box<dyn Connection>> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Engine options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Log every statement at `info`.
    pub echo: bool,
    /// SQLite `PRAGMA foreign_keys`.
    pub foreign_keys: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            echo: false,
            foreign_keys: true,
        }
    }
}

impl EngineConfig {
    pub fn echo(mut self, value: bool) -> Self {
        self.echo = value;
        self
    }

    pub fn foreign_keys(mut self, value: bool) -> Self {
        self.foreign_keys = value;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    File(PathBuf),
}

impl Target {
    fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("sqlite://")
            .ok_or_else(|| Error::Config(format!("unsupported database URL '{url}'; only sqlite:// is available")))?;
        match rest {
            "" | "/" | "/:memory:" => Ok(Target::Memory),
            path => match path.strip_prefix('/') {
                Some(path) if !path.is_empty() => Ok(Target::File(PathBuf::from(path))),
                _ => Err(Error::Config(format!(
                    "malformed sqlite URL '{url}'; expected sqlite:///path"
                ))),
            },
        }
    }
}

struct EngineInner {
    url: String,
    target: Target,
    config: EngineConfig,
    /// The single connection of an in-memory engine.
    shared: Option<SharedConnection>,
}

/// A source of database connections.
///
/// Cloning is cheap; clones share the same connections.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("url", &self.inner.url)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Create an engine with default options.
pub fn create_engine(url: &str) -> Result<Engine> {
    create_engine_with(url, EngineConfig::default())
}

/// Create an engine.
pub fn create_engine_with(url: &str, config: EngineConfig) -> Result<Engine> {
    let target = Target::parse(url)?;
    let mut engine = EngineInner {
        url: url.to_string(),
        target,
        config,
        shared: None,
    };
    if engine.target == Target::Memory {
        engine.shared = Some(Arc::new(Mutex::new(open(&engine)?)));
    }
    tracing::info!(url = %url, echo = engine.config.echo, "Created engine");
    Ok(Engine {
        inner: Arc::new(engine),
    })
}

fn open(engine: &EngineInner) -> Result<Box<dyn Connection>> {
    let sqlite = match &engine.target {
        Target::Memory => SqliteConfig::memory(),
        Target::File(path) => SqliteConfig::file(path),
    }
    .foreign_keys(engine.config.foreign_keys);
    let conn = SqliteConnection::connect(&sqlite)?;
    if engine.config.echo {
        Ok(Box::new(EchoConnection { inner: conn }))
    } else {
        Ok(Box::new(conn))
    }
}

impl Engine {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    /// A connection: the shared one for in-memory engines, a new one otherwise.
    pub fn connect(&self) -> Result<SharedConnection> {
        match &self.inner.shared {
            Some(shared) => Ok(Arc::clone(shared)),
            None => Ok(Arc::new(Mutex::new(open(&self.inner)?))),
        }
    }

    /// Create every missing table of `metadata`.
    pub fn create_all(&self, metadata: &MetaData) -> Result<()> {
        let conn = self.connect()?;
        let mut guard = lock_connection(&conn);
        sqlmodel_schema::create_all(&mut **guard, metadata)
    }

    /// Drop every table of `metadata`.
    pub fn drop_all(&self, metadata: &MetaData) -> Result<()> {
        let conn = self.connect()?;
        let mut guard = lock_connection(&conn);
        sqlmodel_schema::drop_all(&mut **guard, metadata)
    }
}

/// Logs each statement at `info` before running it.
struct EchoConnection<C> {
    inner: C,
}

impl<C: Connection> Connection for EchoConnection<C> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::info!(target: "sqlmodel::engine", sql = %sql, params = ?params);
        self.inner.execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::info!(target: "sqlmodel::engine", sql = %sql, params = ?params);
        self.inner.query(sql, params)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        tracing::info!(target: "sqlmodel::engine", sql = %sql, params = ?params);
        self.inner.insert(sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        tracing::info!(target: "sqlmodel::engine", sql = %sql);
        self.inner.execute_batch(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urls() {
        assert_eq!(Target::parse("sqlite://").unwrap(), Target::Memory);
        assert_eq!(Target::parse("sqlite:///:memory:").unwrap(), Target::Memory);
        assert_eq!(
            Target::parse("sqlite:///database.db").unwrap(),
            Target::File(PathBuf::from("database.db"))
        );
        assert_eq!(
            Target::parse("sqlite:////tmp/heroes.db").unwrap(),
            Target::File(PathBuf::from("/tmp/heroes.db"))
        );
        assert!(matches!(Target::parse("postgresql://localhost/db"), Err(Error::Config(_))));
    }

    #[test]
    fn test_memory_engine_shares_one_connection() {
        let engine = create_engine("sqlite://").unwrap();
        let a = engine.connect().unwrap();
        let b = engine.connect().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        lock_connection(&a)
            .execute_batch("CREATE TABLE team (id INTEGER PRIMARY KEY)")
            .unwrap();
        let rows = lock_connection(&b).query("SELECT id FROM team", &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_file_engine_opens_new_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:///{}", dir.path().join("db.sqlite").display());
        let engine = create_engine_with(&url, EngineConfig::default().echo(true)).unwrap();
        let a = engine.connect().unwrap();
        let b = engine.connect().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        lock_connection(&a)
            .execute_batch("CREATE TABLE team (id INTEGER PRIMARY KEY)")
            .unwrap();
        lock_connection(&b)
            .execute("INSERT INTO team (id) VALUES (?1)", &[Value::BigInt(7)])
            .unwrap();
        let row = lock_connection(&a).query_one("SELECT id FROM team", &[]).unwrap();
        assert_eq!(row.unwrap().get(0), Some(&Value::BigInt(7)));
    }
}
