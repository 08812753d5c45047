//! SQL statement construction for SQLModel Rust.
//!
//! `sqlmodel-query` turns column references and values into SQL text plus
//! bound parameters, for any [`Dialect`].
//!
//! # Role In The Architecture
//!
//! - **Expressions**: [`Expr`] comparisons and boolean combinators, built from
//!   `ModelDescriptor::col` column references.
//! - **SELECT**: [`select`] yields a [`SelectOfScalar`] (one entity or value per
//!   row); [`select_tuple`] yields a [`Select`] (a tuple per row). Joins are
//!   inferred from foreign keys unless an ON clause is given.
//! - **DML**: [`InsertBuilder`], [`UpdateBuilder`] and [`DeleteBuilder`]
//!   render the statements the session issues during flush.
//!
//! Statements only render; `sqlmodel-session` executes them.

pub mod builder;
pub mod clause;
pub mod expr;
pub mod select;

pub use builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use clause::{Direction, Join, JoinKind, OrderBy};
pub use expr::{BinaryOp, Expr};
pub use select::{Select, SelectOfScalar, Selectable, select, select_tuple};
pub use sqlmodel_core::Dialect;
