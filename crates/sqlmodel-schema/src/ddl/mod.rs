//! DDL generation.
//!
//! Each dialect has a [`DdlGenerator`]; the shared rendering helpers live
//! here and the generators only add what their database does differently
//! (autoincrement spelling, column comments, index syntax).

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MysqlDdlGenerator;
pub use postgres::PostgresDdlGenerator;
pub use sqlite::SqliteDdlGenerator;

use sqlmodel_core::{Column, Dialect, MetaData, Table};

/// Generates DDL statements for one dialect.
pub trait DdlGenerator: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// CREATE TABLE plus the statements that belong with it (indexes,
    /// comments).
    fn create_table(&self, table: &Table) -> Vec<String>;

    fn drop_table(&self, table: &Table) -> Vec<String> {
        vec![generate_drop_table(&table.name, self.dialect())]
    }

    /// CREATE statements for every table, referenced tables first.
    fn generate_all(&self, metadata: &MetaData) -> Vec<String> {
        metadata
            .sorted_tables()
            .iter()
            .flat_map(|t| self.create_table(t))
            .collect()
    }

    /// DROP statements for every table, referencing tables first.
    fn generate_drop_all(&self, metadata: &MetaData) -> Vec<String> {
        metadata
            .sorted_tables()
            .iter()
            .rev()
            .flat_map(|t| self.drop_table(t))
            .collect()
    }
}

/// Generator for `dialect`.
#[must_use]
pub fn generator_for(dialect: Dialect) -> Box<dyn DdlGenerator> {
    match dialect {
        Dialect::Sqlite => Box::new(SqliteDdlGenerator),
        Dialect::Postgres => Box::new(PostgresDdlGenerator),
        Dialect::Mysql => Box::new(MysqlDdlGenerator),
    }
}

pub(crate) fn quote_identifier(name: &str, dialect: Dialect) -> String {
    dialect.quote_ident(name)
}

/// Quote a string literal.
pub(crate) fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Name of the index created for an indexed column.
#[must_use]
pub fn index_name(table: &str, column: &str) -> String {
    format!("ix_{table}_{column}")
}

/// Render one column definition. `type_sql` is the already rendered type,
/// `suffix` holds dialect extras placed after the nullability.
pub(crate) fn column_definition(column: &Column, type_sql: &str, suffix: &str, dialect: Dialect) -> String {
    let mut sql = format!("{} {}", quote_identifier(&column.name, dialect), type_sql);
    if let Some(default) = &column.server_default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    sql.push_str(suffix);
    for check in &column.checks {
        sql.push_str(&format!(" CHECK ({check})"));
    }
    sql
}

/// Table-level constraints: primary key, unique columns and foreign keys.
pub(crate) fn table_constraints(table: &Table, dialect: Dialect) -> Vec<String> {
    let mut constraints = Vec::new();

    let pk: Vec<String> = table
        .primary_key()
        .iter()
        .map(|c| quote_identifier(&c.name, dialect))
        .collect();
    if !pk.is_empty() {
        constraints.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }

    for col in table.columns.iter().filter(|c| c.unique && !c.index) {
        constraints.push(format!("UNIQUE ({})", quote_identifier(&col.name, dialect)));
    }

    for col in &table.columns {
        for fk in &col.foreign_keys {
            let mut sql = format!(
                "FOREIGN KEY({}) REFERENCES {} ({})",
                quote_identifier(&col.name, dialect),
                quote_identifier(&fk.table, dialect),
                quote_identifier(&fk.column, dialect)
            );
            if let Some(action) = fk.ondelete {
                sql.push_str(" ON DELETE ");
                sql.push_str(action.as_sql());
            }
            constraints.push(sql);
        }
    }

    constraints
}

/// Generate `CREATE TABLE` from pre-rendered column definitions.
pub(crate) fn generate_create_table(
    table: &Table,
    column_defs: Vec<String>,
    dialect: Dialect,
    if_not_exists: bool,
) -> String {
    let mut body = column_defs;
    body.extend(table_constraints(table, dialect));
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote_identifier(&table.name, dialect),
        body.join(", ")
    )
}

/// Generate `CREATE INDEX` for every indexed column.
pub(crate) fn generate_create_indexes(table: &Table, dialect: Dialect, if_not_exists: bool) -> Vec<String> {
    table
        .columns
        .iter()
        .filter(|c| c.index)
        .map(|col| {
            format!(
                "CREATE {}INDEX {}{} ON {} ({})",
                if col.unique { "UNIQUE " } else { "" },
                if if_not_exists { "IF NOT EXISTS " } else { "" },
                quote_identifier(&index_name(&table.name, &col.name), dialect),
                quote_identifier(&table.name, dialect),
                quote_identifier(&col.name, dialect)
            )
        })
        .collect()
}

pub(crate) fn generate_drop_table(name: &str, dialect: Dialect) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_identifier(name, dialect))
}

pub(crate) fn is_autoincrement(table: &Table, column: &Column) -> bool {
    table
        .autoincrement_column()
        .is_some_and(|c| c.name == column.name)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use sqlmodel_core::{Column, ForeignKey, ModelId, ReferentialAction, SqlType, Table};

    pub fn team() -> Table {
        Table {
            name: "team".to_string(),
            model: ModelId(0),
            columns: vec![
                Column::new(SqlType::Integer).named("id").primary_key(true),
                Column::new(SqlType::AutoString { length: None })
                    .named("name")
                    .nullable(false)
                    .index(true),
                Column::new(SqlType::AutoString { length: Some(100) })
                    .named("headquarters")
                    .nullable(false)
                    .unique(true),
            ],
        }
    }

    pub fn hero() -> Table {
        Table {
            name: "hero".to_string(),
            model: ModelId(1),
            columns: vec![
                Column::new(SqlType::Integer).named("id").primary_key(true),
                Column::new(SqlType::AutoString { length: None })
                    .named("name")
                    .nullable(false)
                    .comment("hero's public name"),
                Column::new(SqlType::Integer).named("age").check("age >= 0"),
                Column::new(SqlType::Integer).named("team_id").foreign_key(ForeignKey {
                    table: "team".to_string(),
                    column: "id".to_string(),
                    ondelete: Some(ReferentialAction::Cascade),
                }),
                Column::new(SqlType::Boolean)
                    .named("active")
                    .nullable(false)
                    .server_default("1"),
            ],
        }
    }
}
