//! Relationship declarations and resolved relationship metadata.
//!
//! A [`RelationshipDecl`] (built with `Relationship::new()`) is what a model
//! author writes. When the registry is built, each declaration is resolved into
//! a [`RelationshipInfo`]: the target model, the relationship kind and the
//! join columns. Higher layers (query builder, session, lazy loader) only ever
//! see the resolved form.

use crate::annotation::{ModelId, ModelRef};
use crate::value::Value;

/// The type of relationship between two models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one: `Hero` has one `Profile` (the target holds the key).
    OneToOne,
    /// Many-to-one: many `Hero`s belong to one `Team`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Team` has many `Hero`s.
    OneToMany,
    /// Many-to-many: `Hero`s have many `Power`s via a link table.
    ManyToMany,
}

impl RelationshipKind {
    /// True if the related side is a collection.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, RelationshipKind::OneToMany | RelationshipKind::ManyToMany)
    }
}

/// Loading strategy for a relationship attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LazyStrategy {
    /// Load with a SELECT on first access.
    #[default]
    Select,
    /// Load eagerly right after the parent query.
    Selectin,
    /// Accessing an unloaded value is an error.
    Raise,
    /// Never load; the attribute stays empty.
    NoLoad,
}

impl LazyStrategy {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "select" | "True" | "true" => Some(LazyStrategy::Select),
            "selectin" => Some(LazyStrategy::Selectin),
            "raise" | "raise_on_sql" => Some(LazyStrategy::Raise),
            "noload" => Some(LazyStrategy::NoLoad),
            _ => None,
        }
    }
}

/// Information about a link/join table for many-to-many relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTableInfo {
    /// The link table name (e.g., `"heroteamlink"`).
    pub table_name: String,

    /// Column in link table pointing to the local model (e.g., `"hero_id"`).
    pub local_column: String,

    /// Column in link table pointing to the remote model (e.g., `"team_id"`).
    pub remote_column: String,
}

impl LinkTableInfo {
    /// Create a new link-table definition.
    pub fn new(
        table_name: impl Into<String>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            local_column: local_column.into(),
            remote_column: remote_column.into(),
        }
    }
}

/// A resolved relationship.
///
/// `local_key` / `remote_key` are column names joined as
/// `this.local_key = target.remote_key`. For many-to-one the local key is the
/// foreign key column; for one-to-many and one-to-one it is the referenced
/// column on this table. For many-to-many both are referenced columns and the
/// link table carries the foreign keys.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipInfo {
    /// Name of the relationship attribute.
    pub name: String,
    pub target: ModelId,
    /// The related model's class name.
    pub related_model: String,
    /// The related model's table name.
    pub related_table: String,
    pub kind: RelationshipKind,
    pub local_key: String,
    pub remote_key: String,
    pub link_table: Option<LinkTableInfo>,
    /// The attribute on the related model that points back.
    pub back_populates: Option<String>,
    pub lazy: LazyStrategy,
    /// True if the attribute holds a collection.
    pub uselist: bool,
    /// Delete related rows with this one (`cascade_delete=True`).
    pub cascade_delete: bool,
    /// Leave related rows to the database's ON DELETE.
    pub passive_deletes: bool,
    /// Never written during flush.
    pub viewonly: bool,
    /// Column of the related table collections are ordered by.
    pub order_by: Option<String>,
}

impl RelationshipInfo {
    /// True if this model's table holds the foreign key.
    #[must_use]
    pub fn holds_foreign_key(&self) -> bool {
        self.kind == RelationshipKind::ManyToOne
    }
}

/// Explicit low-level relationship, bypassing inference.
#[derive(Debug, Clone, PartialEq)]
pub struct SaRelationship {
    pub kind: RelationshipKind,
    pub local_key: String,
    pub remote_key: String,
    pub link_table: Option<LinkTableInfo>,
    pub uselist: Option<bool>,
    pub lazy: LazyStrategy,
    pub back_populates: Option<String>,
}

impl SaRelationship {
    pub fn new(kind: RelationshipKind, local_key: impl Into<String>, remote_key: impl Into<String>) -> Self {
        Self {
            kind,
            local_key: local_key.into(),
            remote_key: remote_key.into(),
            link_table: None,
            uselist: None,
            lazy: LazyStrategy::default(),
            back_populates: None,
        }
    }

    pub fn link_table(mut self, info: LinkTableInfo) -> Self {
        self.link_table = Some(info);
        self
    }

    pub fn uselist(mut self, value: bool) -> Self {
        self.uselist = Some(value);
        self
    }

    pub fn lazy(mut self, strategy: LazyStrategy) -> Self {
        self.lazy = strategy;
        self
    }

    pub fn back_populates(mut self, attribute: impl Into<String>) -> Self {
        self.back_populates = Some(attribute.into());
        self
    }
}

/// Declaration of a relationship attribute.
#[derive(Debug, Clone, Default)]
pub struct RelationshipDecl {
    pub back_populates: Option<String>,
    /// Association model for many-to-many.
    pub link_model: Option<ModelRef>,
    pub cascade_delete: bool,
    pub passive_deletes: bool,
    pub sa_relationship: Option<SaRelationship>,
    /// Positional arguments: `[target_model, secondary_model]`.
    pub sa_relationship_args: Option<Vec<String>>,
    pub sa_relationship_kwargs: Option<Vec<(String, Value)>>,
}

/// Builder entry point: `Relationship::new().back_populates("team")`.
pub type Relationship = RelationshipDecl;

impl RelationshipDecl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn back_populates(mut self, attribute: impl Into<String>) -> Self {
        self.back_populates = Some(attribute.into());
        self
    }

    pub fn link_model(mut self, model: impl Into<ModelRef>) -> Self {
        self.link_model = Some(model.into());
        self
    }

    pub fn cascade_delete(mut self, value: bool) -> Self {
        self.cascade_delete = value;
        self
    }

    pub fn passive_deletes(mut self, value: bool) -> Self {
        self.passive_deletes = value;
        self
    }

    pub fn sa_relationship(mut self, rel: SaRelationship) -> Self {
        self.sa_relationship = Some(rel);
        self
    }

    pub fn sa_relationship_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sa_relationship_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Add one relationship keyword argument.
    pub fn sa_relationship_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sa_relationship_kwargs
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    /// Keyword argument `key`, if supplied.
    #[must_use]
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.sa_relationship_kwargs
            .as_ref()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Options supplied alongside `sa_relationship`, by name.
    #[must_use]
    pub fn options_conflicting_with_sa_relationship(&self) -> Vec<&'static str> {
        if self.sa_relationship.is_none() {
            return Vec::new();
        }
        let mut conflicts = Vec::new();
        if self.sa_relationship_args.is_some() {
            conflicts.push("sa_relationship_args");
        }
        if self.sa_relationship_kwargs.is_some() {
            conflicts.push("sa_relationship_kwargs");
        }
        if self.back_populates.is_some() {
            conflicts.push("back_populates");
        }
        if self.link_model.is_some() {
            conflicts.push("link_model");
        }
        conflicts
    }
}

/// Find a relationship by attribute name.
#[must_use]
pub fn find_relationship<'a>(rels: &'a [RelationshipInfo], name: &str) -> Option<&'a RelationshipInfo> {
    rels.iter().find(|r| r.name == name)
}
