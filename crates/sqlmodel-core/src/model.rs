//! Model declaration: configuration, the raw class namespace and its
//! partitioning.
//!
//! A model is declared with a [`ModelBuilder`], which records a raw namespace
//! in declaration order: annotations, assigned values, field and relationship
//! markers. [`partition`] splits that namespace into data fields, relationship
//! attributes and pass-through class attributes by looking at what each
//! declared value *is*, never at how it was spelled.

use std::collections::HashMap;

use crate::annotation::{Annotation, ModelId};
use crate::error::Result;
use crate::field::FieldInfo;
use crate::registry::Registry;
use crate::relationship::RelationshipDecl;
use crate::value::Value;

/// How unknown keys are treated during construction and validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtraFieldsBehavior {
    /// Drop unknown keys of validation input; keyword construction still
    /// rejects them.
    #[default]
    Ignore,
    /// Reject unknown keys.
    Forbid,
    /// Keep unknown keys as extra attributes.
    Allow,
}

/// Per-model configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelConfig {
    /// Map this model to a table.
    pub table: bool,
    /// Table name; defaults to the lowercased model name.
    pub table_name: Option<String>,
    pub extra: ExtraFieldsBehavior,
    /// Validate values assigned through `Instance::set`.
    pub validate_assignment: bool,
}

/// One entry of a model's raw namespace.
#[derive(Debug, Clone)]
pub enum Declared {
    /// `name: T` (a bare annotation).
    Annotation(Annotation),
    /// `name = Field(...)`.
    Field(FieldInfo),
    /// `name = Relationship(...)`.
    Relationship(RelationshipDecl),
    /// `name = value`.
    Default(Value),
    /// A class-level attribute that is never part of the data model.
    ClassAttr(Value),
}

/// A data field after partitioning.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub annotation: Annotation,
    pub info: FieldInfo,
}

/// A relationship attribute after partitioning.
#[derive(Debug, Clone)]
pub struct RelationshipField {
    pub name: String,
    /// `None` when the relationship was declared without an annotation.
    pub annotation: Option<Annotation>,
    pub decl: RelationshipDecl,
}

/// The three partitions of a model namespace.
#[derive(Debug, Clone, Default)]
pub struct Partitioned {
    pub fields: Vec<FieldDecl>,
    pub relationships: Vec<RelationshipField>,
    pub passthrough: Vec<(String, Value)>,
    /// `Field(...)` values without an annotation; reported when the model is
    /// declared.
    pub unannotated: Vec<String>,
}

/// Split a raw namespace into fields, relationships and pass-through
/// attributes.
///
/// A relationship marker wins over an annotation for the same name. Bare
/// annotations become required fields, annotated values become defaults,
/// un-annotated values pass through untouched. Output order follows the first
/// appearance of each name.
#[must_use]
pub fn partition(namespace: Vec<(String, Declared)>) -> Partitioned {
    let mut order: Vec<String> = Vec::new();
    let mut annotations: HashMap<String, Annotation> = HashMap::new();
    let mut values: HashMap<String, Declared> = HashMap::new();

    for (name, declared) in namespace {
        if !annotations.contains_key(&name) && !values.contains_key(&name) {
            order.push(name.clone());
        }
        match declared {
            Declared::Annotation(ann) => {
                annotations.insert(name, ann);
            }
            value => {
                values.insert(name, value);
            }
        }
    }

    let mut out = Partitioned::default();
    for name in order {
        let annotation = annotations.remove(&name);
        match (values.remove(&name), annotation) {
            (Some(Declared::Relationship(decl)), annotation) => {
                out.relationships.push(RelationshipField {
                    name,
                    annotation,
                    decl,
                });
            }
            (Some(Declared::ClassAttr(value)), _) | (Some(Declared::Default(value)), None) => {
                out.passthrough.push((name, value));
            }
            (Some(Declared::Field(_)), None) => out.unannotated.push(name),
            (Some(Declared::Field(info)), Some(annotation)) => {
                out.fields.push(FieldDecl {
                    name,
                    annotation,
                    info,
                });
            }
            (Some(Declared::Default(value)), Some(annotation)) => {
                out.fields.push(FieldDecl {
                    name,
                    annotation,
                    info: FieldInfo::new().default(value),
                });
            }
            (None | Some(Declared::Annotation(_)), Some(annotation)) => {
                out.fields.push(FieldDecl {
                    name,
                    annotation,
                    info: FieldInfo::new(),
                });
            }
            (None | Some(Declared::Annotation(_)), None) => {}
        }
    }
    out
}

/// Phase-one declaration of a model.
///
/// ```ignore
/// let mut registry = Registry::new();
/// ModelBuilder::table("Hero")
///     .field("id", Annotation::optional(Annotation::Int), Field::new().default(Value::Null).primary_key(true))
///     .annotate("name", Annotation::Str)
///     .with_default("age", Annotation::optional(Annotation::Int), Value::Null)
///     .declare(&mut registry)?;
/// ```
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    pub(crate) name: String,
    pub(crate) config: ModelConfig,
    pub(crate) parent: Option<String>,
    pub(crate) namespace: Vec<(String, Declared)>,
}

impl ModelBuilder {
    /// A pure data model (no table).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ModelConfig::default(),
            parent: None,
            namespace: Vec::new(),
        }
    }

    /// A table model (`table=True`).
    pub fn table(name: impl Into<String>) -> Self {
        let mut builder = Self::new(name);
        builder.config.table = true;
        builder
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.config.table_name = Some(name.into());
        self
    }

    pub fn config(mut self, config: ModelConfig) -> Self {
        let table = self.config.table || config.table;
        self.config = config;
        self.config.table = table;
        self
    }

    pub fn extra(mut self, behavior: ExtraFieldsBehavior) -> Self {
        self.config.extra = behavior;
        self
    }

    pub fn validate_assignment(mut self, value: bool) -> Self {
        self.config.validate_assignment = value;
        self
    }

    /// Inherit the fields and relationships of an already declared model.
    pub fn inherits(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Raw namespace entry.
    pub fn declare_entry(mut self, name: impl Into<String>, declared: Declared) -> Self {
        self.namespace.push((name.into(), declared));
        self
    }

    /// `name: annotation` (required field).
    pub fn annotate(self, name: impl Into<String>, annotation: Annotation) -> Self {
        self.declare_entry(name, Declared::Annotation(annotation))
    }

    /// `name: annotation = Field(...)`.
    pub fn field(self, name: impl Into<String>, annotation: Annotation, info: FieldInfo) -> Self {
        let name = name.into();
        self.annotate(name.clone(), annotation)
            .declare_entry(name, Declared::Field(info))
    }

    /// `name: annotation = value`.
    pub fn with_default(
        self,
        name: impl Into<String>,
        annotation: Annotation,
        value: impl Into<Value>,
    ) -> Self {
        let name = name.into();
        self.annotate(name.clone(), annotation)
            .declare_entry(name, Declared::Default(value.into()))
    }

    /// `name: annotation = Relationship(...)`.
    pub fn relationship(
        self,
        name: impl Into<String>,
        annotation: Annotation,
        decl: RelationshipDecl,
    ) -> Self {
        let name = name.into();
        self.annotate(name.clone(), annotation)
            .declare_entry(name, Declared::Relationship(decl))
    }

    /// A class attribute outside the data model.
    pub fn class_attr(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.declare_entry(name, Declared::ClassAttr(value.into()))
    }

    /// Declare into `registry`.
    pub fn declare(self, registry: &mut Registry) -> Result<ModelId> {
        registry.declare(self)
    }
}
