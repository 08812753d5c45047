//! SQLite connection configuration.

use std::path::{Path, PathBuf};

/// Where and how to open a SQLite database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Database file; `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// Enforce foreign keys (`PRAGMA foreign_keys = ON`).
    pub foreign_keys: bool,
    /// Milliseconds to wait on a locked database before failing.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::memory()
    }
}

impl SqliteConfig {
    /// An in-memory database.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            path: None,
            foreign_keys: true,
            busy_timeout_ms: 5_000,
        }
    }

    /// A database file, created when missing.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::memory()
        }
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn busy_timeout_ms(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.path.is_none()
    }
}
