//! SQL databases in Rust, designed to be intuitive and type-safe.
//!
//! One model declaration is both a validated data model and a mapped table.
//! Declare models with [`ModelBuilder`], build the [`Registry`] into a
//! [`Schema`], create the tables through an [`Engine`] and work with
//! [`Instance`]s inside a [`Session`].
//!
//! # Role In The Architecture
//!
//! This is the facade crate. It re-exports the pieces most applications need:
//!
//! - **Models** from `sqlmodel-core`: declarations, the registry, instances,
//!   values, validation errors.
//! - **Statements** from `sqlmodel-query`: [`select`], [`select_tuple`], [`Expr`].
//! - **Sessions** from `sqlmodel-session`: [`create_engine`], [`Session`],
//!   [`AsyncSession`] and their results.
//! - **DDL** from `sqlmodel-schema` and the SQLite driver, for direct use.
//!
//! # Example
//!
//! ```ignore
//! use sqlmodel::prelude::*;
//!
//! let mut registry = Registry::new();
//! ModelBuilder::table("Hero")
//!     .field("id", Annotation::optional(Annotation::Int), Field::new().default(Value::Null).primary_key(true))
//!     .annotate("name", Annotation::Str)
//!     .annotate("secret_name", Annotation::Str)
//!     .with_default("age", Annotation::optional(Annotation::Int), Value::Null)
//!     .declare(&mut registry)?;
//! let schema = registry.build()?;
//! let hero = schema.model("Hero")?;
//!
//! let engine = create_engine("sqlite:///database.db")?;
//! engine.create_all(schema.metadata())?;
//!
//! let session = Session::new(&engine)?;
//! session.add(&hero.construct(kwargs! { "name" => "Deadpond", "secret_name" => "Dive Wilson" })?)?;
//! session.commit()?;
//!
//! let found = session
//!     .exec(&select(hero).where_(Expr::from(hero.col("name")?).eq("Deadpond")))?
//!     .one()?;
//! ```

pub use sqlmodel_query as query;
pub use sqlmodel_schema as schema;
pub use sqlmodel_session as session;
pub use sqlmodel_sqlite as sqlite;

pub use sqlmodel_core::{
    Annotation, AttrValue, Column, ColumnRef, Dialect, DumpMode, DumpOptions, EnumType, Error,
    ExtraFieldsBehavior, Field, FieldInfo, FieldValidationError, ForeignKey, Instance, Kwargs,
    LazyStrategy, MetaData, ModelBuilder, ModelConfig, ModelDescriptor, ModelDump, ObjectState,
    ReferentialAction, Registry, Related, Relationship, RelationshipKind, Result, SaRelationship,
    Schema, SqlType, Table, UpdateSource, ValidateInput, ValidationError, ValidationErrorKind,
    Value, clear_registry, kwargs,
};
pub use sqlmodel_query::{Expr, OrderBy, Select, SelectOfScalar, Selectable, select, select_tuple};
pub use sqlmodel_session::{
    AsyncSession, Engine, EngineConfig, Executable, ObjectKey, ScalarResult, Selected, Session,
    SessionConfig, TupleResult, create_engine, create_engine_with, handoff,
};

/// The process-wide registry models are declared into by default.
pub use sqlmodel_core::registry::global as default_registry;

/// Everything needed to declare models and query them.
pub mod prelude {
    pub use crate::{
        Annotation, AsyncSession, Dialect, DumpMode, DumpOptions, Engine, EngineConfig, Error,
        Executable, Expr, Field, Instance, ModelBuilder, ModelConfig, ModelDescriptor,
        ObjectState, Registry, Related, Relationship, Result, Schema, Selected, Session,
        SessionConfig, Value, create_engine, create_engine_with, kwargs, select, select_tuple,
    };
}
