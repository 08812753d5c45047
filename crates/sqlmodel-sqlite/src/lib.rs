//! SQLite driver for SQLModel Rust.
//!
//! `sqlmodel-sqlite` implements [`sqlmodel_core::Connection`] on top of
//! `rusqlite` (bundled libsqlite3).
//!
//! # Role In The Architecture
//!
//! - Binds [`Value`](sqlmodel_core::Value) parameters and converts result
//!   cells back into `Value`s.
//! - Is the connection behind `sqlite://` engines in `sqlmodel-session`.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlmodel_sqlite::{SqliteConfig, SqliteConnection};
//!
//! let conn = SqliteConnection::connect(&SqliteConfig::file("heroes.db"))?;
//! ```

pub mod config;
pub mod connection;

pub use config::SqliteConfig;
pub use connection::SqliteConnection;
