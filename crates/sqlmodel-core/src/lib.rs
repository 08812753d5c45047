//! Core types and traits for SQLModel Rust.
//!
//! `sqlmodel-core` is the **foundation layer** for the entire ecosystem. It defines the
//! model declaration API, the registry that resolves declared models, model instances
//! and the data types every other crate builds on.
//!
//! # Role In The Architecture
//!
//! - **Declaration**: `ModelBuilder`, `Field` and `Relationship` describe a model the way
//!   a class body does: annotations, defaults, field and relationship markers.
//! - **Resolution**: `Registry` checks declarations, synthesizes table columns, resolves
//!   forward references and relationship kinds, and builds an immutable `Schema`.
//! - **Instances**: `Instance` validates, dumps and tracks persistence state for one
//!   object of a built model.
//! - **Data model**: `Row`, `Value`, `SqlType` and `Dialect` represent query inputs and
//!   outputs and are shared across query, schema, session and driver crates.
//! - **Contract layer**: `Connection` is implemented by drivers; `LazyLoader` by the
//!   session.
//!
//! # Who Uses This Crate
//!
//! - `sqlmodel-query` turns `ColumnRef`s and `Value`s into SQL.
//! - `sqlmodel-schema` renders DDL from `MetaData`.
//! - `sqlmodel-session` persists `Instance`s through a `Connection`.
//! - `sqlmodel-sqlite` implements `Connection` and returns `Row`s of `Value`s.
//!
//! Most applications should use the `sqlmodel` facade; reach for `sqlmodel-core` directly
//! when writing drivers or advanced integrations.

pub mod annotation;
pub mod connection;
pub mod error;
pub mod field;
pub mod fields_set;
pub mod identifiers;
pub mod instance;
pub mod model;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod schema;
pub mod synth;
pub mod types;
pub mod validate;
pub mod value;

pub use annotation::{Annotation, EnumType, ModelId, ModelRef};
pub use connection::Connection;
pub use error::{Error, FieldValidationError, Result, ValidationError, ValidationErrorKind};
pub use field::{
    Column, ColumnArg, ColumnRef, Field, FieldDefault, FieldInfo, ForeignKey, ReferentialAction,
};
pub use fields_set::FieldsSet;
pub use identifiers::{default_table_name, quote_ident, quote_ident_mysql};
pub use instance::{
    AttrValue, AttributeSource, DumpMode, DumpOptions, Instance, Kwargs, LazyLoader, MapperState,
    ModelDump, ObjectState, Related, UpdateSource, ValidateInput,
};
pub use model::{Declared, ExtraFieldsBehavior, ModelBuilder, ModelConfig};
pub use registry::{DeclaredModel, Registry, clear_registry};
pub use relationship::{
    LazyStrategy, LinkTableInfo, Relationship, RelationshipDecl, RelationshipInfo,
    RelationshipKind, SaRelationship, find_relationship,
};
pub use row::Row;
pub use schema::{FieldDescriptor, MetaData, ModelDescriptor, Schema, Table};
pub use types::{Dialect, SqlType};
pub use value::{Value, ValueKey};
