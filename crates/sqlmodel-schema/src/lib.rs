//! Schema creation for SQLModel Rust.
//!
//! `sqlmodel-schema` renders the DDL for the tables of a built
//! [`Schema`](sqlmodel_core::Schema) and applies it through a
//! [`Connection`].
//!
//! # Role In The Architecture
//!
//! - **DDL generation**: one [`DdlGenerator`] per dialect turns a
//!   [`Table`] into `CREATE TABLE` / `CREATE INDEX` statements.
//! - **Create / drop**: [`create_all`] creates every missing table in
//!   foreign-key dependency order and is safe to call repeatedly;
//!   [`drop_all`] removes them in reverse order.
//! - **Introspection**: [`introspect::table_exists`] and
//!   [`introspect::table_names`] answer what is already there.
//!
//! Migrations are out of scope: existing tables are never altered.

pub mod ddl;
pub mod introspect;

pub use ddl::{
    DdlGenerator, MysqlDdlGenerator, PostgresDdlGenerator, SqliteDdlGenerator, generator_for,
    index_name,
};

use sqlmodel_core::{Connection, MetaData, Result, Table};

/// Create every table of `metadata` that does not exist yet, with its
/// indexes. Existing tables are left untouched.
pub fn create_all<C: Connection + ?Sized>(conn: &mut C, metadata: &MetaData) -> Result<()> {
    let generator = generator_for(conn.dialect());
    let mut created = 0usize;

    run_in_transaction(conn, |conn| {
        for table in metadata.sorted_tables() {
            if introspect::table_exists(conn, &table.name)? {
                tracing::debug!(table = %table.name, "Table exists; skipping");
                continue;
            }
            create_table_with(conn, generator.as_ref(), table)?;
            created += 1;
        }
        Ok(())
    })?;

    tracing::info!(
        tables = metadata.len(),
        created,
        dialect = conn.dialect().name(),
        "create_all complete"
    );
    Ok(())
}

/// Drop every table of `metadata` that exists, referencing tables first.
pub fn drop_all<C: Connection + ?Sized>(conn: &mut C, metadata: &MetaData) -> Result<()> {
    let generator = generator_for(conn.dialect());

    run_in_transaction(conn, |conn| {
        for table in metadata.sorted_tables().iter().rev() {
            if !introspect::table_exists(conn, &table.name)? {
                continue;
            }
            for stmt in generator.drop_table(table) {
                conn.execute(&stmt, &[])?;
            }
        }
        Ok(())
    })?;

    tracing::info!(tables = metadata.len(), "drop_all complete");
    Ok(())
}

/// Create one table and its indexes.
pub fn create_table<C: Connection + ?Sized>(conn: &mut C, table: &Table) -> Result<()> {
    let generator = generator_for(conn.dialect());
    create_table_with(conn, generator.as_ref(), table)
}

fn create_table_with<C: Connection + ?Sized>(
    conn: &mut C,
    generator: &dyn DdlGenerator,
    table: &Table,
) -> Result<()> {
    for stmt in generator.create_table(table) {
        tracing::debug!(sql = %stmt, "Executing DDL");
        conn.execute(&stmt, &[])?;
    }
    Ok(())
}

fn run_in_transaction<C, F>(conn: &mut C, body: F) -> Result<()>
where
    C: Connection + ?Sized,
    F: FnOnce(&mut C) -> Result<()>,
{
    conn.begin()?;
    match body(conn) {
        Ok(()) => conn.commit(),
        Err(err) => {
            if let Err(rollback_err) = conn.rollback() {
                tracing::warn!(error = %rollback_err, "Rollback after failed DDL failed");
            }
            Err(err)
        }
    }
}
