//! MySQL DDL generator.
//!
//! MySQL has no `CREATE INDEX IF NOT EXISTS`; `create_all` skips existing
//! tables before their indexes are created.

use super::{
    DdlGenerator, column_definition, generate_create_indexes, generate_create_table, quote_literal,
};
use sqlmodel_core::{Dialect, Table};

/// DDL generator for MySQL.
pub struct MysqlDdlGenerator;

impl DdlGenerator for MysqlDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn create_table(&self, table: &Table) -> Vec<String> {
        tracing::debug!(dialect = "mysql", table = %table.name, "Generating DDL");

        let columns = table
            .columns
            .iter()
            .map(|c| {
                let mut suffix = String::new();
                if super::is_autoincrement(table, c) {
                    suffix.push_str(" AUTO_INCREMENT");
                }
                if let Some(comment) = &c.comment {
                    suffix.push_str(" COMMENT ");
                    suffix.push_str(&quote_literal(comment));
                }
                column_definition(c, &c.sql_type.render(Dialect::Mysql), &suffix, Dialect::Mysql)
            })
            .collect();

        let mut stmts = vec![generate_create_table(table, columns, Dialect::Mysql, true)];
        stmts.extend(generate_create_indexes(table, Dialect::Mysql, false));

        for stmt in &stmts {
            tracing::trace!(sql = %stmt, "Generated MySQL DDL statement");
        }
        stmts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::fixtures::{hero, team};

    #[test]
    fn test_auto_increment_and_default_length() {
        let stmts = MysqlDdlGenerator.create_table(&team());
        assert!(stmts[0].contains("`id` INTEGER NOT NULL AUTO_INCREMENT"));
        assert!(stmts[0].contains("`name` VARCHAR(255) NOT NULL"));
        assert_eq!(stmts[1], "CREATE INDEX `ix_team_name` ON `team` (`name`)");
    }

    #[test]
    fn test_inline_comment() {
        let stmts = MysqlDdlGenerator.create_table(&hero());
        assert!(stmts[0].contains("`name` VARCHAR(255) NOT NULL COMMENT 'hero''s public name'"));
    }
}
