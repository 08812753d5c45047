//! SELECT statements.
//!
//! [`select`] with a single entity or column produces a [`SelectOfScalar`]:
//! each result row collapses to that one item. [`select_tuple`] produces a
//! [`Select`] whose rows keep one entry per selected item. Both share the
//! same builder surface (`where_`, `join`, `order_by`, `limit`, `offset`).
//!
//! ```ignore
//! let stmt = select(&hero)
//!     .join(&team)
//!     .where_(team.col("name")?.eq("Preventers"))
//!     .order_by(hero.col("name")?)
//!     .limit(10);
//! let (sql, params) = stmt.build_with_dialect(Dialect::Sqlite)?;
//! ```

use std::sync::Arc;

use crate::clause::{Join, JoinKind, OrderBy};
use crate::expr::Expr;
use sqlmodel_core::{ColumnRef, Dialect, Error, MetaData, ModelDescriptor, Result, Value};

/// One item of a select list.
#[derive(Debug, Clone)]
pub enum Selectable {
    /// Every column of a table model; each row yields an instance.
    Entity(Arc<ModelDescriptor>),
    Column(ColumnRef),
    /// A computed expression such as `count(*)`.
    Expr(Expr),
}

impl Selectable {
    /// Number of result columns this item occupies.
    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Selectable::Entity(model) => model.fields().iter().filter(|f| f.column.is_some()).count(),
            Selectable::Column(_) | Selectable::Expr(_) => 1,
        }
    }

    fn table(&self) -> Option<&str> {
        match self {
            Selectable::Entity(model) => model.table_name(),
            Selectable::Column(col) => Some(col.table.as_str()),
            Selectable::Expr(_) => None,
        }
    }

    fn write(&self, dialect: Dialect, params: &mut Vec<Value>) -> Result<Vec<String>> {
        match self {
            Selectable::Entity(model) => {
                let table = model.table_name().ok_or_else(|| {
                    Error::Config(format!(
                        "{} is not a table model and cannot be selected",
                        model.name()
                    ))
                })?;
                Ok(model
                    .fields()
                    .iter()
                    .filter_map(|f| f.column_name())
                    .map(|c| ColumnRef::qualified(table, c).to_sql(dialect))
                    .collect())
            }
            Selectable::Column(col) => Ok(vec![col.to_sql(dialect)]),
            Selectable::Expr(expr) => Ok(vec![expr.write(dialect, 0, params)]),
        }
    }
}

impl From<&Arc<ModelDescriptor>> for Selectable {
    fn from(model: &Arc<ModelDescriptor>) -> Self {
        Selectable::Entity(Arc::clone(model))
    }
}

impl From<Arc<ModelDescriptor>> for Selectable {
    fn from(model: Arc<ModelDescriptor>) -> Self {
        Selectable::Entity(model)
    }
}

impl From<ColumnRef> for Selectable {
    fn from(col: ColumnRef) -> Self {
        Selectable::Column(col)
    }
}

impl From<Expr> for Selectable {
    fn from(expr: Expr) -> Self {
        match expr {
            Expr::Column(col) => Selectable::Column(col),
            other => Selectable::Expr(other),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingJoin {
    target: Arc<ModelDescriptor>,
    on: Option<Expr>,
    kind: JoinKind,
}

#[derive(Debug, Clone, Default)]
struct SelectCore {
    items: Vec<Selectable>,
    from: Vec<Arc<ModelDescriptor>>,
    joins: Vec<PendingJoin>,
    where_clause: Option<Expr>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
}

impl SelectCore {
    fn new(items: Vec<Selectable>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    fn schema_metadata(&self) -> Option<MetaData> {
        let model = self
            .items
            .iter()
            .find_map(|i| match i {
                Selectable::Entity(m) => Some(m),
                _ => None,
            })
            .or_else(|| self.from.first())
            .or_else(|| self.joins.first().map(|j| &j.target))?;
        model.schema().ok().map(|s| s.metadata().clone())
    }

    fn build(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        if self.items.is_empty() {
            return Err(Error::Config("select() needs at least one entity or column".into()));
        }
        let mut params = Vec::new();

        let mut columns = Vec::new();
        for item in &self.items {
            columns.extend(item.write(dialect, &mut params)?);
        }

        let joined: Vec<&str> = self
            .joins
            .iter()
            .filter_map(|j| j.target.table_name())
            .collect();
        let mut from: Vec<String> = Vec::new();
        let explicit = self.from.iter().filter_map(|m| m.table_name());
        for table in explicit.chain(self.items.iter().filter_map(Selectable::table)) {
            if !joined.contains(&table) && !from.iter().any(|t| t == table) {
                from.push(table.to_string());
            }
        }
        if from.is_empty() {
            return Err(Error::Config("select() has no table to select from".into()));
        }

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&columns.join(", "));
        sql.push_str(" FROM ");
        let quoted: Vec<String> = from.iter().map(|t| dialect.quote_ident(t)).collect();
        sql.push_str(&quoted.join(", "));

        let metadata = self.schema_metadata().unwrap_or_default();
        let mut visible = from.clone();
        for pending in &self.joins {
            let table = pending.target.table_name().ok_or_else(|| {
                Error::Config(format!(
                    "{} is not a table model and cannot be joined",
                    pending.target.name()
                ))
            })?;
            let on = match &pending.on {
                Some(on) => on.clone(),
                None => infer_join_condition(&metadata, &visible, table)?,
            };
            let join = Join {
                kind: pending.kind,
                table: table.to_string(),
                on,
            };
            sql.push(' ');
            sql.push_str(&join.write(dialect, 0, &mut params));
            visible.push(table.to_string());
        }

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.write(dialect, 0, &mut params));
        }

        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|o| o.write(dialect, 0, &mut params))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => match dialect {
                Dialect::Postgres => sql.push_str(&format!(" OFFSET {offset}")),
                Dialect::Sqlite => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
                Dialect::Mysql => sql.push_str(&format!(" LIMIT {} OFFSET {offset}", u64::MAX)),
            },
            (None, None) => {}
        }

        tracing::trace!(sql = %sql, params = params.len(), "Rendered SELECT");
        Ok((sql, params))
    }
}

/// ON condition from the single foreign key linking `target` with one of the
/// tables already in the statement.
fn infer_join_condition(metadata: &MetaData, visible: &[String], target: &str) -> Result<Expr> {
    let target_table = metadata
        .table(target)
        .ok_or_else(|| Error::Config(format!("unknown table '{target}' in join")))?;
    let mut candidates = Vec::new();
    for left in visible {
        let Some(left_table) = metadata.table(left) else { continue };
        for col in &target_table.columns {
            for fk in col.foreign_keys.iter().filter(|fk| &fk.table == left) {
                candidates.push(
                    Expr::qualified(target, &col.name).eq(Expr::qualified(left, &fk.column)),
                );
            }
        }
        if left == target {
            continue;
        }
        for col in &left_table.columns {
            for fk in col.foreign_keys.iter().filter(|fk| fk.table == target) {
                candidates.push(
                    Expr::qualified(left, &col.name).eq(Expr::qualified(target, &fk.column)),
                );
            }
        }
    }
    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(Error::Config(format!(
            "can't find any foreign key relationships between {} and '{target}'",
            visible.join(", ")
        ))),
        n => Err(Error::Config(format!(
            "{n} foreign key relationships link '{target}' to {}; pass an explicit ON clause",
            visible.join(", ")
        ))),
    }
}

macro_rules! impl_select_builder {
    ($ty:ident) => {
        impl $ty {
            /// Add a WHERE condition; repeated calls are ANDed.
            pub fn where_(mut self, expr: impl Into<Expr>) -> Self {
                let expr = expr.into();
                self.core.where_clause = Some(match self.core.where_clause.take() {
                    Some(existing) => existing.and(expr),
                    None => expr,
                });
                self
            }

            /// Inner join on the foreign key linking `target` to the statement.
            pub fn join(mut self, target: &Arc<ModelDescriptor>) -> Self {
                self.core.joins.push(PendingJoin {
                    target: Arc::clone(target),
                    on: None,
                    kind: JoinKind::Inner,
                });
                self
            }

            /// Left outer join on the inferred foreign key.
            pub fn outer_join(mut self, target: &Arc<ModelDescriptor>) -> Self {
                self.core.joins.push(PendingJoin {
                    target: Arc::clone(target),
                    on: None,
                    kind: JoinKind::Left,
                });
                self
            }

            /// Inner join with an explicit ON condition.
            pub fn join_on(mut self, target: &Arc<ModelDescriptor>, on: Expr) -> Self {
                self.core.joins.push(PendingJoin {
                    target: Arc::clone(target),
                    on: Some(on),
                    kind: JoinKind::Inner,
                });
                self
            }

            /// Left outer join with an explicit ON condition.
            pub fn outer_join_on(mut self, target: &Arc<ModelDescriptor>, on: Expr) -> Self {
                self.core.joins.push(PendingJoin {
                    target: Arc::clone(target),
                    on: Some(on),
                    kind: JoinKind::Left,
                });
                self
            }

            /// Add a table to FROM explicitly, e.g. for `select(count_all())`.
            pub fn select_from(mut self, model: &Arc<ModelDescriptor>) -> Self {
                self.core.from.push(Arc::clone(model));
                self
            }

            pub fn order_by(mut self, key: impl Into<OrderBy>) -> Self {
                self.core.order_by.push(key.into());
                self
            }

            pub fn limit(mut self, n: u64) -> Self {
                self.core.limit = Some(n);
                self
            }

            pub fn offset(mut self, n: u64) -> Self {
                self.core.offset = Some(n);
                self
            }

            pub fn distinct(mut self) -> Self {
                self.core.distinct = true;
                self
            }

            /// Render with the default dialect (Postgres).
            pub fn build(&self) -> Result<(String, Vec<Value>)> {
                self.build_with_dialect(Dialect::default())
            }

            /// Render for `dialect`.
            pub fn build_with_dialect(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
                self.core.build(dialect)
            }
        }
    };
}

/// A select whose rows collapse to a single entity or value.
#[derive(Debug, Clone)]
pub struct SelectOfScalar {
    core: SelectCore,
}

impl SelectOfScalar {
    #[must_use]
    pub fn item(&self) -> &Selectable {
        &self.core.items[0]
    }
}

impl_select_builder!(SelectOfScalar);

/// A select whose rows keep one entry per selected item.
#[derive(Debug, Clone)]
pub struct Select {
    core: SelectCore,
}

impl Select {
    #[must_use]
    pub fn items(&self) -> &[Selectable] {
        &self.core.items
    }
}

impl_select_builder!(Select);

/// Select one entity, column or expression.
pub fn select(item: impl Into<Selectable>) -> SelectOfScalar {
    SelectOfScalar {
        core: SelectCore::new(vec![item.into()]),
    }
}

/// Select several items; rows come back as tuples.
pub fn select_tuple<I, S>(items: I) -> Select
where
    I: IntoIterator<Item = S>,
    S: Into<Selectable>,
{
    Select {
        core: SelectCore::new(items.into_iter().map(Into::into).collect()),
    }
}
