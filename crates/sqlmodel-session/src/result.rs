//! Executing selects and the results they produce.
//!
//! Rows are fetched completely before a result is returned, so results never
//! hold the connection and can cross threads freely.

use std::sync::Arc;

use sqlmodel_core::{Connection, Error, Instance, ModelDescriptor, Result, Row, Value};
use sqlmodel_query::{Select, SelectOfScalar, Selectable};

use crate::loading::decode_entity;
use crate::session::{Session, SessionInner};

/// One selected item of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Selected {
    /// An entity, mapped through the identity map.
    Instance(Instance),
    /// A column or expression value; also an entity missed by an outer join.
    Value(Value),
}

impl Selected {
    #[must_use]
    pub fn instance(&self) -> Option<&Instance> {
        match self {
            Selected::Instance(instance) => Some(instance),
            Selected::Value(_) => None,
        }
    }

    #[must_use]
    pub fn into_instance(self) -> Option<Instance> {
        match self {
            Selected::Instance(instance) => Some(instance),
            Selected::Value(_) => None,
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Selected::Value(value) => Some(value),
            Selected::Instance(_) => None,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Selected::Value(value) => Some(value),
            Selected::Instance(_) => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Selected::Value(Value::Null))
    }
}

impl From<Instance> for Selected {
    fn from(instance: Instance) -> Self {
        Selected::Instance(instance)
    }
}

impl From<Value> for Selected {
    fn from(value: Value) -> Self {
        Selected::Value(value)
    }
}

/// A statement a [`Session`] can execute.
pub trait Executable {
    type Output;

    fn execute(&self, session: &Session) -> Result<Self::Output>;
}

impl Executable for SelectOfScalar {
    type Output = ScalarResult;

    fn execute(&self, session: &Session) -> Result<ScalarResult> {
        let rows = run(session, |dialect| self.build_with_dialect(dialect))?;
        let inner = session.inner();
        let item = self.item();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = row.into_values().into_iter();
            out.push(decode_item(inner, item, &mut cells)?);
        }
        if let Selectable::Entity(model) = item {
            eager_load_column(inner, model, out.iter())?;
        }
        Ok(ScalarResult { rows: out })
    }
}

impl Executable for Select {
    type Output = TupleResult;

    fn execute(&self, session: &Session) -> Result<TupleResult> {
        let rows = run(session, |dialect| self.build_with_dialect(dialect))?;
        let inner = session.inner();
        let items = self.items();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = row.into_values().into_iter();
            let decoded = items
                .iter()
                .map(|item| decode_item(inner, item, &mut cells))
                .collect::<Result<Vec<_>>>()?;
            out.push(decoded);
        }
        for (idx, item) in items.iter().enumerate() {
            if let Selectable::Entity(model) = item {
                eager_load_column(inner, model, out.iter().map(|row| &row[idx]))?;
            }
        }
        Ok(TupleResult { rows: out })
    }
}

/// Autoflush, then run the rendered statement.
fn run<F>(session: &Session, render: F) -> Result<Vec<Row>>
where
    F: FnOnce(sqlmodel_core::Dialect) -> Result<(String, Vec<Value>)>,
{
    session.autoflush()?;
    let mut guard = session.inner().connection();
    let conn: &mut dyn Connection = &mut **guard;
    let (sql, params) = render(conn.dialect())?;
    let rows = conn.query(&sql, &params)?;
    tracing::debug!(rows = rows.len(), "Executed select");
    Ok(rows)
}

fn decode_item(
    inner: &SessionInner,
    item: &Selectable,
    cells: &mut impl Iterator<Item = Value>,
) -> Result<Selected> {
    match item {
        Selectable::Entity(model) => {
            let values = decode_entity(model, cells)?;
            Ok(inner
                .register_loaded(model, values)
                .map_or(Selected::Value(Value::Null), Selected::Instance))
        }
        Selectable::Column(col) => {
            let raw = cells.next().ok_or_else(|| missing(&col.name))?;
            match &col.sql_type {
                Some(ty) => Ok(Selected::Value(ty.result(raw)?)),
                None => Ok(Selected::Value(raw)),
            }
        }
        Selectable::Expr(_) => Ok(Selected::Value(cells.next().ok_or_else(|| missing("expression"))?)),
    }
}

fn missing(what: &str) -> Error {
    Error::Database(format!("result row is missing a value for {what}"))
}

fn eager_load_column<'a>(
    inner: &SessionInner,
    model: &Arc<ModelDescriptor>,
    cells: impl Iterator<Item = &'a Selected>,
) -> Result<()> {
    if model.relationships().is_empty() {
        return Ok(());
    }
    let mut instances: Vec<Instance> = Vec::new();
    for inst in cells.filter_map(Selected::instance) {
        if !instances.iter().any(|i| i.same(inst)) {
            instances.push(inst.clone());
        }
    }
    inner.eager_load(&instances)
}

fn exactly_one<T>(mut rows: Vec<T>) -> Result<T> {
    match rows.len() {
        0 => Err(Error::NoResultFound),
        1 => Ok(rows.remove(0)),
        n => Err(Error::MultipleResultsFound(n)),
    }
}

fn at_most_one<T>(mut rows: Vec<T>) -> Result<Option<T>> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(Some(rows.remove(0))),
        n => Err(Error::MultipleResultsFound(n)),
    }
}

/// Rows of a single-item select.
#[derive(Debug, Clone, Default)]
pub struct ScalarResult {
    rows: Vec<Selected>,
}

impl ScalarResult {
    #[must_use]
    pub fn all(self) -> Vec<Selected> {
        self.rows
    }

    #[must_use]
    pub fn first(self) -> Option<Selected> {
        self.rows.into_iter().next()
    }

    /// Exactly one row.
    pub fn one(self) -> Result<Selected> {
        exactly_one(self.rows)
    }

    /// Zero or one row.
    pub fn one_or_none(self) -> Result<Option<Selected>> {
        at_most_one(self.rows)
    }

    /// The selected instances, skipping outer-join misses.
    #[must_use]
    pub fn instances(self) -> Vec<Instance> {
        self.rows.into_iter().filter_map(Selected::into_instance).collect()
    }

    /// The selected values of a column or expression select.
    #[must_use]
    pub fn values(self) -> Vec<Value> {
        self.rows.into_iter().filter_map(Selected::into_value).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl IntoIterator for ScalarResult {
    type Item = Selected;
    type IntoIter = std::vec::IntoIter<Selected>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Rows of a multi-item select, one entry per selected item.
#[derive(Debug, Clone, Default)]
pub struct TupleResult {
    rows: Vec<Vec<Selected>>,
}

impl TupleResult {
    #[must_use]
    pub fn all(self) -> Vec<Vec<Selected>> {
        self.rows
    }

    #[must_use]
    pub fn first(self) -> Option<Vec<Selected>> {
        self.rows.into_iter().next()
    }

    pub fn one(self) -> Result<Vec<Selected>> {
        exactly_one(self.rows)
    }

    pub fn one_or_none(self) -> Result<Option<Vec<Selected>>> {
        at_most_one(self.rows)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl IntoIterator for TupleResult {
    type Item = Vec<Selected>;
    type IntoIter = std::vec::IntoIter<Vec<Selected>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(values: &[i64]) -> ScalarResult {
        ScalarResult {
            rows: values.iter().map(|v| Selected::Value(Value::BigInt(*v))).collect(),
        }
    }

    #[test]
    fn test_one_counts_rows() {
        assert_eq!(scalar(&[7]).one().unwrap(), Selected::Value(Value::BigInt(7)));
        assert!(matches!(scalar(&[]).one(), Err(Error::NoResultFound)));
        assert!(matches!(scalar(&[1, 2]).one(), Err(Error::MultipleResultsFound(2))));
    }

    #[test]
    fn test_one_or_none() {
        assert_eq!(scalar(&[]).one_or_none().unwrap(), None);
        assert!(scalar(&[3]).one_or_none().unwrap().is_some());
        assert!(matches!(scalar(&[1, 2, 3]).one_or_none(), Err(Error::MultipleResultsFound(3))));
    }

    #[test]
    fn test_values_and_first() {
        assert_eq!(scalar(&[1, 2]).values(), vec![Value::BigInt(1), Value::BigInt(2)]);
        assert_eq!(scalar(&[4, 5]).first(), Some(Selected::Value(Value::BigInt(4))));
        assert!(scalar(&[1]).instances().is_empty());
        assert!(Selected::Value(Value::Null).is_null());
    }
}
