//! Session and Unit of Work for SQLModel Rust.
//!
//! The Session is the central unit-of-work manager. It holds a database connection,
//! tracks instances, and coordinates flushing changes to the database.
//!
//! # Role In The Architecture
//!
//! - **Engines**: [`create_engine`] turns a `sqlite://` URL into an [`Engine`], the
//!   source of connections, and creates or drops the tables of a `MetaData`.
//! - **Identity map**: each row is represented by at most one [`Instance`] per session,
//!   keyed by table and primary key ([`ObjectKey`]).
//! - **Unit of work**: `add`, `delete` and attribute changes are recorded and written
//!   in dependency order by `flush`; `commit` and `rollback` end the transaction.
//! - **Loading**: relationships load lazily through the session, or eagerly for
//!   `selectin` relationships right after a select.
//! - **Async**: [`AsyncSession`] runs the same session on tokio's blocking pool, and
//!   instances it owns refuse to load outside the [`handoff`].
//!
//! # Example
//!
//! ```ignore
//! let engine = create_engine("sqlite://")?;
//! engine.create_all(schema.metadata())?;
//!
//! let session = Session::new(&engine)?;
//! session.add(&hero)?;
//! session.commit()?;
//!
//! // Identity map hit: the same instance comes back
//! let again = session.get(&hero_model, 1)?.expect("row exists");
//! assert!(again.same(&hero));
//!
//! session.delete(&hero)?;
//! session.commit()?;
//! ```
//!
//! [`Instance`]: sqlmodel_core::Instance

pub mod async_session;
pub mod engine;
mod flush;
pub mod handoff;
mod loading;
pub mod result;
pub mod session;

pub use async_session::AsyncSession;
pub use engine::{Engine, EngineConfig, SharedConnection, create_engine, create_engine_with};
pub use result::{Executable, ScalarResult, Selected, TupleResult};
pub use session::{ObjectKey, Session, SessionConfig};
