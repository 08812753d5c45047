//! Built models: descriptors, tables and the metadata collection.
//!
//! [`Registry::build`](crate::Registry::build) turns declared models into a
//! [`Schema`]. Each model becomes an immutable [`ModelDescriptor`] shared
//! through `Arc`; every table model contributes one [`Table`] to the schema's
//! [`MetaData`], which lists tables in foreign-key dependency order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};

use crate::annotation::{Annotation, ModelId};
use crate::error::{Error, Result};
use crate::field::{Column, ColumnRef, FieldInfo};
use crate::model::ModelConfig;
use crate::relationship::{RelationshipInfo, find_relationship};
use crate::value::Value;

/// A data field of a built model.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub annotation: Annotation,
    pub info: FieldInfo,
    /// The backing column; `None` for non-table models.
    pub column: Option<Column>,
}

impl FieldDescriptor {
    #[must_use]
    pub fn column_name(&self) -> Option<&str> {
        self.column.as_ref().map(|c| c.name.as_str())
    }

    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.column.as_ref().is_some_and(|c| c.primary_key)
    }
}

/// An immutable, fully resolved model.
#[derive(Debug)]
pub struct ModelDescriptor {
    pub(crate) id: ModelId,
    pub(crate) name: String,
    pub(crate) config: ModelConfig,
    pub(crate) table_name: Option<String>,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) relationships: Vec<RelationshipInfo>,
    pub(crate) passthrough: Vec<(String, Value)>,
    pub(crate) primary_key: Vec<usize>,
    pub(crate) schema: Weak<Schema>,
}

impl ModelDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ModelId,
        name: String,
        config: ModelConfig,
        table_name: Option<String>,
        fields: Vec<FieldDescriptor>,
        relationships: Vec<RelationshipInfo>,
        passthrough: Vec<(String, Value)>,
        schema: Weak<Schema>,
    ) -> Self {
        let primary_key = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_primary_key())
            .map(|(i, _)| i)
            .collect();
        Self {
            id,
            name,
            config,
            table_name,
            fields,
            relationships,
            passthrough,
            primary_key,
            schema,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ModelId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// True for table models.
    #[must_use]
    pub const fn is_table(&self) -> bool {
        self.config.table
    }

    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field addressed by input key: its alias if it has one, else its name.
    #[must_use]
    pub fn field_for_key(&self, key: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.info.alias.as_deref() == Some(key))
            .or_else(|| self.field_index(key))
    }

    /// Field backed by the column named `column`.
    #[must_use]
    pub fn field_for_column(&self, column: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.column_name() == Some(column))
    }

    #[must_use]
    pub fn relationships(&self) -> &[RelationshipInfo] {
        &self.relationships
    }

    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&RelationshipInfo> {
        find_relationship(&self.relationships, name)
    }

    /// Indices of the primary-key fields, in declaration order.
    #[must_use]
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    /// Pass-through class attribute.
    #[must_use]
    pub fn class_attr(&self, name: &str) -> Option<&Value> {
        self.passthrough
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Column expression for the field `name`, for use in statements.
    pub fn col(&self, name: &str) -> Result<ColumnRef> {
        let table = self.table_name.as_deref().ok_or_else(|| {
            Error::Config(format!("{} is not a table model; it has no columns", self.name))
        })?;
        let field = self
            .field(name)
            .ok_or_else(|| Error::Config(format!("{} has no field '{name}'", self.name)))?;
        let column = field.column_name().unwrap_or(name);
        Ok(ColumnRef {
            table: table.to_string(),
            name: column.to_string(),
            field: Some(field.name.clone()),
            sql_type: field.column.as_ref().map(|c| c.sql_type.clone()),
        })
    }

    /// The schema this model was built into.
    pub fn schema(&self) -> Result<Arc<Schema>> {
        self.schema.upgrade().ok_or_else(|| {
            Error::Config(format!("the schema that built {} has been dropped", self.name))
        })
    }

    /// Target model of a relationship.
    pub fn related_model(&self, rel: &RelationshipInfo) -> Result<Arc<ModelDescriptor>> {
        let schema = self.schema()?;
        schema.model_by_id(rel.target).cloned().ok_or_else(|| {
            Error::Config(format!("{}.{}: unknown target model", self.name, rel.name))
        })
    }
}

/// A table of the metadata collection.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    /// The model mapped to this table.
    pub model: ModelId,
    pub columns: Vec<Column>,
}

impl Table {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn primary_key(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// The column filled in by the database on insert: the single integer
    /// primary key, unless autoincrement was switched off.
    #[must_use]
    pub fn autoincrement_column(&self) -> Option<&Column> {
        match self.primary_key().as_slice() {
            [pk] if pk.sql_type.is_integer() && pk.autoincrement != Some(false) => Some(*pk),
            [pk] if pk.autoincrement == Some(true) => Some(*pk),
            _ => None,
        }
    }

    /// Names of other tables referenced by foreign keys.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<&str> {
        self.columns
            .iter()
            .flat_map(|c| c.foreign_keys.iter())
            .map(|fk| fk.table.as_str())
            .filter(|t| *t != self.name)
            .collect()
    }
}

/// The set of tables derived from all table models.
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    tables: Vec<Table>,
}

impl MetaData {
    /// Collect `tables`, ordering them so referenced tables come first.
    ///
    /// Ties keep declaration order; tables caught in a foreign-key cycle are
    /// appended in declaration order.
    #[must_use]
    pub fn new(tables: Vec<Table>) -> Self {
        let known: HashSet<String> = tables.iter().map(|t| t.name.clone()).collect();
        let mut pending: Vec<Option<Table>> = tables.into_iter().map(Some).collect();
        let mut placed: HashSet<String> = HashSet::new();
        let mut sorted = Vec::with_capacity(pending.len());

        loop {
            let ready = pending.iter().position(|slot| {
                slot.as_ref().is_some_and(|t| {
                    t.dependencies()
                        .iter()
                        .all(|dep| placed.contains(*dep) || !known.contains(*dep))
                })
            });
            let Some(idx) = ready else { break };
            if let Some(table) = pending[idx].take() {
                placed.insert(table.name.clone());
                sorted.push(table);
            }
        }
        sorted.extend(pending.into_iter().flatten());
        Self { tables: sorted }
    }

    /// Tables in dependency order.
    #[must_use]
    pub fn sorted_tables(&self) -> &[Table] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// The built form of a registry.
#[derive(Debug)]
pub struct Schema {
    models: Vec<Arc<ModelDescriptor>>,
    by_name: HashMap<String, ModelId>,
    metadata: MetaData,
}

impl Schema {
    pub(crate) fn new(models: Vec<Arc<ModelDescriptor>>, metadata: MetaData) -> Self {
        let by_name = models.iter().map(|m| (m.name.clone(), m.id)).collect();
        Self {
            models,
            by_name,
            metadata,
        }
    }

    /// Model by class name.
    pub fn model(&self, name: &str) -> Result<&Arc<ModelDescriptor>> {
        self.get(name)
            .ok_or_else(|| Error::Config(format!("unknown model '{name}'")))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ModelDescriptor>> {
        self.by_name.get(name).and_then(|id| self.model_by_id(*id))
    }

    #[must_use]
    pub fn model_by_id(&self, id: ModelId) -> Option<&Arc<ModelDescriptor>> {
        self.models.get(id.0)
    }

    /// Model mapped to `table`.
    #[must_use]
    pub fn table_model(&self, table: &str) -> Option<&Arc<ModelDescriptor>> {
        self.models
            .iter()
            .find(|m| m.table_name.as_deref() == Some(table))
    }

    #[must_use]
    pub fn models(&self) -> &[Arc<ModelDescriptor>] {
        &self.models
    }

    #[must_use]
    pub const fn metadata(&self) -> &MetaData {
        &self.metadata
    }
}
