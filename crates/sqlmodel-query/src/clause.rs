//! Statement clauses: ORDER BY and JOIN.

use crate::expr::Expr;
use sqlmodel_core::{ColumnRef, Dialect, Value};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(expr: impl Into<Expr>) -> Self {
        Self {
            expr: expr.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(expr: impl Into<Expr>) -> Self {
        Self {
            expr: expr.into(),
            direction: Direction::Desc,
        }
    }

    pub(crate) fn write(&self, dialect: Dialect, offset: usize, params: &mut Vec<Value>) -> String {
        let sql = self.expr.write(dialect, offset, params);
        match self.direction {
            Direction::Asc => sql,
            Direction::Desc => format!("{sql} DESC"),
        }
    }
}

impl From<Expr> for OrderBy {
    fn from(expr: Expr) -> Self {
        Self::asc(expr)
    }
}

impl From<ColumnRef> for OrderBy {
    fn from(col: ColumnRef) -> Self {
        Self::asc(col)
    }
}

/// Kind of JOIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

/// A JOIN against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: Expr,
}

impl Join {
    pub(crate) fn write(&self, dialect: Dialect, offset: usize, params: &mut Vec<Value>) -> String {
        let keyword = match self.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT OUTER JOIN",
        };
        format!(
            "{keyword} {} ON {}",
            dialect.quote_ident(&self.table),
            self.on.write(dialect, offset, params)
        )
    }
}
