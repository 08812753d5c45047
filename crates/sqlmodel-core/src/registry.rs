//! The model registry.
//!
//! Declaration happens in two phases. [`Registry::declare`] records a model,
//! checks its field and relationship declarations, and synthesizes columns for
//! table models. [`Registry::build`] resolves model references (forward
//! references included), infers relationship kinds and join columns from
//! foreign keys, checks reciprocal `back_populates` pairs and produces an
//! immutable [`Schema`].
//!
//! Build is repeatable: declaring more models and building again produces a
//! fresh schema covering all of them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, info};

use crate::annotation::{ModelId, ModelRef};
use crate::error::{Error, Result};
use crate::field::{Column, ForeignKey};
use crate::identifiers::default_table_name;
use crate::model::{FieldDecl, ModelBuilder, ModelConfig, RelationshipField, partition};
use crate::relationship::{LazyStrategy, LinkTableInfo, RelationshipInfo, RelationshipKind};
use crate::schema::{FieldDescriptor, MetaData, ModelDescriptor, Schema, Table};
use crate::synth::{check_field_declaration, synthesize_column};
use crate::value::Value;

/// A model after phase-one declaration.
#[derive(Debug, Clone)]
pub struct DeclaredModel {
    pub id: ModelId,
    pub name: String,
    pub config: ModelConfig,
    pub fields: Vec<FieldDecl>,
    /// One entry per field; `Some` for table models.
    pub columns: Vec<Option<Column>>,
    pub relationships: Vec<RelationshipField>,
    pub passthrough: Vec<(String, Value)>,
}

impl DeclaredModel {
    /// Table name for table models.
    #[must_use]
    pub fn table_name(&self) -> Option<String> {
        self.config.table.then(|| {
            self.config
                .table_name
                .clone()
                .unwrap_or_else(|| default_table_name(&self.name))
        })
    }

    fn table_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().flatten()
    }
}

/// Collection of declared models.
#[derive(Debug, Default)]
pub struct Registry {
    models: Vec<DeclaredModel>,
    by_name: HashMap<String, ModelId>,
    schema: Option<Arc<Schema>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase one: record a model and check its declarations.
    pub fn declare(&mut self, builder: ModelBuilder) -> Result<ModelId> {
        let ModelBuilder {
            name,
            config,
            parent,
            namespace,
        } = builder;

        if self.by_name.contains_key(&name) {
            return Err(Error::Config(format!(
                "a model named '{name}' is already declared in this registry"
            )));
        }

        let own = partition(namespace);
        if let Some(attr) = own.unannotated.first() {
            return Err(Error::Config(format!(
                "{name}.{attr}: Field() was assigned without a type annotation"
            )));
        }

        let (mut fields, mut relationships, mut passthrough) = match &parent {
            Some(parent_name) => {
                let parent = self.declared(parent_name).ok_or_else(|| {
                    Error::Config(format!("{name} inherits from unknown model '{parent_name}'"))
                })?;
                (
                    parent.fields.clone(),
                    parent.relationships.clone(),
                    parent.passthrough.clone(),
                )
            }
            None => (Vec::new(), Vec::new(), Vec::new()),
        };
        for field in own.fields {
            relationships.retain(|r| r.name != field.name);
            match fields.iter_mut().find(|f| f.name == field.name) {
                Some(slot) => *slot = field,
                None => fields.push(field),
            }
        }
        for rel in own.relationships {
            fields.retain(|f| f.name != rel.name);
            match relationships.iter_mut().find(|r| r.name == rel.name) {
                Some(slot) => *slot = rel,
                None => relationships.push(rel),
            }
        }
        for (attr, value) in own.passthrough {
            passthrough.retain(|(n, _)| *n != attr);
            passthrough.push((attr, value));
        }

        for field in &fields {
            check_field_declaration(&name, &field.name, &field.info)?;
        }
        for rel in &relationships {
            let conflicts = rel.decl.options_conflicting_with_sa_relationship();
            if !conflicts.is_empty() {
                return Err(Error::Config(format!(
                    "{name}.{}: passing {} is not supported when also passing a sa_relationship",
                    rel.name,
                    conflicts.join(", ")
                )));
            }
        }

        let columns = if config.table {
            self.synthesize_table(&name, &fields, &relationships)?
        } else {
            if !relationships.is_empty() {
                debug!(
                    model = %name,
                    relationships = relationships.len(),
                    "Relationships on a non-table model are kept for subclasses only"
                );
            }
            vec![None; fields.len()]
        };

        let id = ModelId(self.models.len());
        debug!(
            model = %name,
            table = config.table,
            fields = fields.len(),
            relationships = relationships.len(),
            "Declared model"
        );
        self.by_name.insert(name.clone(), id);
        self.models.push(DeclaredModel {
            id,
            name,
            config,
            fields,
            columns,
            relationships,
            passthrough,
        });
        self.schema = None;
        Ok(id)
    }

    fn synthesize_table(
        &self,
        model: &str,
        fields: &[FieldDecl],
        relationships: &[RelationshipField],
    ) -> Result<Vec<Option<Column>>> {
        let mut columns = Vec::with_capacity(fields.len());
        let mut seen = HashSet::new();
        for field in fields {
            let column = synthesize_column(model, &field.name, &field.annotation, &field.info)?;
            if !seen.insert(column.name.clone()) {
                return Err(Error::Config(format!(
                    "{model}: more than one field maps to column '{}'",
                    column.name
                )));
            }
            columns.push(Some(column));
        }
        if !columns.iter().flatten().any(|c| c.primary_key) {
            return Err(Error::Config(format!(
                "{model} is a table model but declares no primary key"
            )));
        }
        for rel in relationships {
            if rel.annotation.is_none() {
                return Err(Error::Config(format!(
                    "{model}.{}: Relationship() was assigned without a type annotation",
                    rel.name
                )));
            }
        }
        Ok(columns)
    }

    /// Phase-one record of `name`.
    #[must_use]
    pub fn declared(&self, name: &str) -> Option<&DeclaredModel> {
        self.by_name.get(name).map(|id| &self.models[id.0])
    }

    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<ModelId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// The last built schema, if nothing was declared since.
    #[must_use]
    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.schema.clone()
    }

    /// Forget every declared model.
    pub fn clear(&mut self) {
        self.models.clear();
        self.by_name.clear();
        self.schema = None;
    }

    /// Phase two: resolve references and relationships and build the schema.
    pub fn build(&mut self) -> Result<Arc<Schema>> {
        if let Some(schema) = &self.schema {
            return Ok(Arc::clone(schema));
        }

        let mut table_owner: HashMap<String, &DeclaredModel> = HashMap::new();
        for model in &self.models {
            if let Some(table) = model.table_name() {
                if let Some(other) = table_owner.insert(table.clone(), model) {
                    return Err(Error::Config(format!(
                        "{} and {} both map to table '{table}'",
                        other.name, model.name
                    )));
                }
            }
        }
        for model in &self.models {
            for column in model.table_columns() {
                for fk in &column.foreign_keys {
                    check_foreign_key_target(&table_owner, model, column, fk)?;
                }
            }
        }

        let mut resolved: Vec<Vec<RelationshipInfo>> = Vec::with_capacity(self.models.len());
        for model in &self.models {
            let mut infos = Vec::new();
            if model.config.table {
                for rel in &model.relationships {
                    infos.push(self.resolve_relationship(model, rel)?);
                }
            }
            resolved.push(infos);
        }
        self.check_back_populates(&resolved)?;

        let tables: Vec<Table> = self
            .models
            .iter()
            .filter_map(|m| {
                m.table_name().map(|name| Table {
                    name,
                    model: m.id,
                    columns: m.table_columns().cloned().collect(),
                })
            })
            .collect();
        let metadata = MetaData::new(tables);

        let schema = Arc::new_cyclic(|weak| {
            let descriptors = self
                .models
                .iter()
                .zip(resolved)
                .map(|(m, relationships)| {
                    let fields = m
                        .fields
                        .iter()
                        .zip(&m.columns)
                        .map(|(f, column)| FieldDescriptor {
                            name: f.name.clone(),
                            annotation: f.annotation.clone(),
                            info: f.info.clone(),
                            column: column.clone(),
                        })
                        .collect();
                    Arc::new(ModelDescriptor::new(
                        m.id,
                        m.name.clone(),
                        m.config.clone(),
                        m.table_name(),
                        fields,
                        relationships,
                        m.passthrough.clone(),
                        weak.clone(),
                    ))
                })
                .collect();
            Schema::new(descriptors, metadata)
        });

        info!(
            models = schema.models().len(),
            tables = schema.metadata().len(),
            "Built model registry"
        );
        self.schema = Some(Arc::clone(&schema));
        Ok(schema)
    }

    fn lookup(&self, name: &str) -> std::result::Result<ModelId, String> {
        self.id_of(name)
            .ok_or_else(|| format!("references unknown model '{name}'"))
    }

    fn resolve_ref(&self, target: &ModelRef) -> std::result::Result<ModelId, String> {
        match target {
            ModelRef::Resolved(id) if id.0 < self.models.len() => Ok(*id),
            ModelRef::Resolved(id) => Err(format!("references unknown model #{}", id.0)),
            ModelRef::Unresolved(name) => self.lookup(name),
        }
    }

    fn resolve_relationship(
        &self,
        owner: &DeclaredModel,
        rel: &RelationshipField,
    ) -> Result<RelationshipInfo> {
        let ctx = |message: String| Error::Config(format!("{}.{}: {message}", owner.name, rel.name));

        let annotation = rel
            .annotation
            .as_ref()
            .ok_or_else(|| ctx("relationship has no type annotation".to_string()))?;
        let (target_ref, many) = annotation.relationship_target().map_err(ctx)?;
        let target_id = match rel.decl.sa_relationship_args.as_ref().and_then(|a| a.first()) {
            Some(name) => self.lookup(name).map_err(ctx)?,
            None => self.resolve_ref(target_ref).map_err(ctx)?,
        };
        let target = &self.models[target_id.0];
        let target_table = target
            .table_name()
            .ok_or_else(|| ctx(format!("'{}' is not a table model", target.name)))?;
        let owner_table = owner
            .table_name()
            .ok_or_else(|| ctx(format!("'{}' is not a table model", owner.name)))?;

        let mut info = RelationshipInfo {
            name: rel.name.clone(),
            target: target_id,
            related_model: target.name.clone(),
            related_table: target_table.clone(),
            kind: RelationshipKind::default(),
            local_key: String::new(),
            remote_key: String::new(),
            link_table: None,
            back_populates: rel.decl.back_populates.clone(),
            lazy: LazyStrategy::default(),
            uselist: many,
            cascade_delete: rel.decl.cascade_delete,
            passive_deletes: rel.decl.passive_deletes,
            viewonly: false,
            order_by: None,
        };

        if let Some(sa) = &rel.decl.sa_relationship {
            info.kind = sa.kind;
            info.local_key.clone_from(&sa.local_key);
            info.remote_key.clone_from(&sa.remote_key);
            info.link_table.clone_from(&sa.link_table);
            info.uselist = sa.uselist.unwrap_or(sa.kind.is_collection());
            info.lazy = sa.lazy;
            info.back_populates.clone_from(&sa.back_populates);
            return Ok(info);
        }

        let mut foreign_keys: Option<String> = None;
        for (key, value) in rel.decl.sa_relationship_kwargs.iter().flatten() {
            let text = || {
                value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ctx(format!("sa_relationship_kwargs['{key}'] must be a string")))
            };
            let flag = || {
                value
                    .as_bool()
                    .ok_or_else(|| ctx(format!("sa_relationship_kwargs['{key}'] must be a bool")))
            };
            match key.as_str() {
                "lazy" => {
                    let strategy = text()?;
                    info.lazy = LazyStrategy::parse(&strategy)
                        .ok_or_else(|| ctx(format!("unknown lazy strategy '{strategy}'")))?;
                }
                "foreign_keys" => foreign_keys = Some(text()?),
                "order_by" => info.order_by = Some(column_part(&text()?).to_string()),
                "uselist" => info.uselist = flag()?,
                "viewonly" => info.viewonly = flag()?,
                "passive_deletes" => info.passive_deletes = flag()?,
                "cascade" => {
                    if text()?
                        .split(',')
                        .any(|part| matches!(part.trim(), "all" | "delete"))
                    {
                        info.cascade_delete = true;
                    }
                }
                other => {
                    return Err(ctx(format!("unsupported sa_relationship_kwargs key '{other}'")));
                }
            }
        }
        let wanted = foreign_keys.as_deref().map(column_part);

        let link = rel.decl.link_model.clone().or_else(|| {
            rel.decl
                .sa_relationship_args
                .as_ref()
                .and_then(|a| a.get(1))
                .map(|name| ModelRef::Unresolved(name.clone()))
        });
        if let Some(link) = link {
            if !many {
                return Err(ctx("link_model requires a List[...] annotation".to_string()));
            }
            let link_model = &self.models[self.resolve_ref(&link).map_err(ctx)?.0];
            let link_table = link_model
                .table_name()
                .ok_or_else(|| ctx(format!("link model '{}' is not a table model", link_model.name)))?;
            let to_owner = foreign_key_columns(link_model, &owner_table, None);
            let to_target = foreign_key_columns(link_model, &target_table, None);
            let (local, remote) = if owner.id == target_id {
                match to_owner.as_slice() {
                    [a, b, ..] => (*a, *b),
                    _ => {
                        return Err(ctx(format!(
                            "'{link_table}' needs two foreign keys to '{owner_table}'"
                        )));
                    }
                }
            } else {
                match (to_owner.as_slice(), to_target.as_slice()) {
                    ([a], [b]) => (*a, *b),
                    _ => {
                        return Err(ctx(format!(
                            "cannot determine the columns of link table '{link_table}' \
                             referencing '{owner_table}' and '{target_table}'"
                        )));
                    }
                }
            };
            info.kind = RelationshipKind::ManyToMany;
            info.local_key.clone_from(&local.1.column);
            info.remote_key.clone_from(&remote.1.column);
            info.link_table = Some(LinkTableInfo::new(
                link_table,
                local.0.name.clone(),
                remote.0.name.clone(),
            ));
            return Ok(info);
        }

        if many {
            let candidates = foreign_key_columns(target, &owner_table, wanted);
            match candidates.as_slice() {
                [(column, fk)] => {
                    info.kind = RelationshipKind::OneToMany;
                    info.local_key.clone_from(&fk.column);
                    info.remote_key.clone_from(&column.name);
                }
                [] => {
                    return Err(ctx(format!(
                        "no foreign key on '{target_table}' references '{owner_table}'"
                    )));
                }
                _ => {
                    return Err(ctx(format!(
                        "several foreign keys on '{target_table}' reference '{owner_table}'; \
                         pass foreign_keys in sa_relationship_kwargs"
                    )));
                }
            }
        } else {
            let here = foreign_key_columns(owner, &target_table, wanted);
            let there = if owner.id == target_id {
                Vec::new()
            } else {
                foreign_key_columns(target, &owner_table, wanted)
            };
            match (here.as_slice(), there.as_slice()) {
                ([(column, fk)], rest) if rest.is_empty() || wanted.is_some() => {
                    info.kind = RelationshipKind::ManyToOne;
                    info.local_key.clone_from(&column.name);
                    info.remote_key.clone_from(&fk.column);
                }
                ([], [(column, fk)]) => {
                    info.kind = RelationshipKind::OneToOne;
                    info.local_key.clone_from(&fk.column);
                    info.remote_key.clone_from(&column.name);
                }
                ([], []) => {
                    return Err(ctx(format!(
                        "no foreign key links '{owner_table}' and '{target_table}'"
                    )));
                }
                _ => {
                    return Err(ctx(format!(
                        "several foreign keys link '{owner_table}' and '{target_table}'; \
                         pass foreign_keys in sa_relationship_kwargs"
                    )));
                }
            }
        }
        Ok(info)
    }

    fn check_back_populates(&self, resolved: &[Vec<RelationshipInfo>]) -> Result<()> {
        for (owner, infos) in self.models.iter().zip(resolved) {
            for info in infos {
                let Some(back) = &info.back_populates else { continue };
                let target = &self.models[info.target.0];
                let reciprocal = resolved[info.target.0]
                    .iter()
                    .find(|r| &r.name == back)
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "{}.{}: back_populates='{back}' but {} has no relationship '{back}'",
                            owner.name, info.name, target.name
                        ))
                    })?;
                if reciprocal.target != owner.id {
                    return Err(Error::Config(format!(
                        "{}.{}: back_populates='{back}' but {}.{back} does not point back to {}",
                        owner.name, info.name, target.name, owner.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Column part of `"table.column"` (or the whole string).
fn column_part(s: &str) -> &str {
    s.rsplit_once('.').map_or(s, |(_, column)| column)
}

/// Columns of `model` with a foreign key into `table`, optionally restricted
/// to the column named `wanted`.
fn foreign_key_columns<'a>(
    model: &'a DeclaredModel,
    table: &str,
    wanted: Option<&str>,
) -> Vec<(&'a Column, &'a ForeignKey)> {
    model
        .table_columns()
        .filter(|c| wanted.is_none_or(|w| c.name == w))
        .filter_map(|c| {
            c.foreign_keys
                .iter()
                .find(|fk| fk.table == table)
                .map(|fk| (c, fk))
        })
        .collect()
}

fn check_foreign_key_target(
    tables: &HashMap<String, &DeclaredModel>,
    model: &DeclaredModel,
    column: &Column,
    fk: &ForeignKey,
) -> Result<()> {
    let referenced = tables.get(&fk.table).ok_or_else(|| {
        Error::Config(format!(
            "{}.{}: foreign key '{}' references unknown table '{}'",
            model.name,
            column.name,
            fk.target(),
            fk.table
        ))
    })?;
    if !referenced.table_columns().any(|c| c.name == fk.column) {
        return Err(Error::Config(format!(
            "{}.{}: foreign key '{}' references unknown column '{}'",
            model.name,
            column.name,
            fk.target(),
            fk.column
        )));
    }
    Ok(())
}

static GLOBAL: OnceLock<Mutex<Registry>> = OnceLock::new();

/// The process-wide default registry.
pub fn global() -> MutexGuard<'static, Registry> {
    GLOBAL
        .get_or_init(|| Mutex::new(Registry::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Forget every model declared in the default registry.
pub fn clear_registry() {
    global().clear();
}
