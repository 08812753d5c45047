//! PostgreSQL DDL generator.

use super::{
    DdlGenerator, column_definition, generate_create_indexes, generate_create_table,
    quote_identifier, quote_literal,
};
use sqlmodel_core::{Dialect, SqlType, Table};

/// DDL generator for PostgreSQL.
pub struct PostgresDdlGenerator;

impl DdlGenerator for PostgresDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn create_table(&self, table: &Table) -> Vec<String> {
        tracing::debug!(dialect = "postgres", table = %table.name, "Generating DDL");

        let columns = table
            .columns
            .iter()
            .map(|c| {
                let type_sql = if super::is_autoincrement(table, c) {
                    match c.sql_type {
                        SqlType::BigInteger => "BIGSERIAL".to_string(),
                        _ => "SERIAL".to_string(),
                    }
                } else {
                    c.sql_type.render(Dialect::Postgres)
                };
                column_definition(c, &type_sql, "", Dialect::Postgres)
            })
            .collect();

        let mut stmts = vec![generate_create_table(table, columns, Dialect::Postgres, true)];
        stmts.extend(generate_create_indexes(table, Dialect::Postgres, true));

        for col in &table.columns {
            if let Some(comment) = &col.comment {
                stmts.push(format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    quote_identifier(&table.name, Dialect::Postgres),
                    quote_identifier(&col.name, Dialect::Postgres),
                    quote_literal(comment)
                ));
            }
        }

        for stmt in &stmts {
            tracing::trace!(sql = %stmt, "Generated PostgreSQL DDL statement");
        }
        stmts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::fixtures::{hero, team};

    #[test]
    fn test_serial_primary_key() {
        let stmts = PostgresDdlGenerator.create_table(&team());
        assert!(stmts[0].starts_with("CREATE TABLE IF NOT EXISTS \"team\" (\"id\" SERIAL NOT NULL"));
    }

    #[test]
    fn test_column_comment() {
        let stmts = PostgresDdlGenerator.create_table(&hero());
        assert_eq!(
            stmts.last().map(String::as_str),
            Some("COMMENT ON COLUMN \"hero\".\"name\" IS 'hero''s public name'")
        );
    }

    #[test]
    fn test_autoincrement_off_keeps_type() {
        let mut table = team();
        table.columns[0].autoincrement = Some(false);
        let stmts = PostgresDdlGenerator.create_table(&table);
        assert!(stmts[0].contains("\"id\" INTEGER NOT NULL"));
    }
}
