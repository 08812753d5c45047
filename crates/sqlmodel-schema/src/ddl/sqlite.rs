//! SQLite DDL generator.
//!
//! A single `INTEGER` primary key declared through the table-level PRIMARY KEY
//! becomes SQLite's rowid alias, so autoincrement needs no extra keyword.
//! Column comments have no SQLite counterpart and are dropped.

use super::{DdlGenerator, column_definition, generate_create_indexes, generate_create_table};
use sqlmodel_core::{Dialect, Table};

/// DDL generator for SQLite.
pub struct SqliteDdlGenerator;

impl DdlGenerator for SqliteDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn create_table(&self, table: &Table) -> Vec<String> {
        tracing::debug!(dialect = "sqlite", table = %table.name, "Generating DDL");

        let columns = table
            .columns
            .iter()
            .map(|c| column_definition(c, &c.sql_type.render(Dialect::Sqlite), "", Dialect::Sqlite))
            .collect();

        let mut stmts = vec![generate_create_table(table, columns, Dialect::Sqlite, true)];
        stmts.extend(generate_create_indexes(table, Dialect::Sqlite, true));

        for stmt in &stmts {
            tracing::trace!(sql = %stmt, "Generated SQLite DDL statement");
        }
        stmts
    }
}
