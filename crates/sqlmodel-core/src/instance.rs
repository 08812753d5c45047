//! Model instances.
//!
//! An [`Instance`] is a shared handle to one object of a built model. Clones
//! of the handle refer to the same object, which is what the session's
//! identity map hands out: loading the same row twice yields handles for which
//! [`Instance::same`] is true.
//!
//! # Role In The Architecture
//!
//! - **Validation**: non-table models validate on construction; every model
//!   validates through [`Instance::model_validate`].
//! - **Persistence state**: table-model instances carry a [`MapperState`]
//!   (lifecycle state, committed snapshot, dirty fields, loaded relationships)
//!   that the session reads and updates while flushing.
//! - **Lazy loading**: unloaded relationships and expired attributes are
//!   fetched through the [`LazyLoader`] the instance is bound to.
//!
//! No method holds the instance lock while calling into a loader or while
//! locking another instance.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeMap, Serializer};
use uuid::Uuid;

use crate::annotation::Annotation;
use crate::error::{Error, FieldValidationError, Result, ValidationError, ValidationErrorKind};
use crate::field::FieldDefault;
use crate::fields_set::FieldsSet;
use crate::model::ExtraFieldsBehavior;
use crate::relationship::{LazyStrategy, RelationshipInfo};
use crate::schema::ModelDescriptor;
use crate::validate::validate_value;
use crate::value::Value;

/// Lifecycle state of a table-model instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ObjectState {
    /// Not associated with a session.
    #[default]
    Transient,
    /// Added to a session, not yet flushed.
    Pending,
    /// Has a row in the database and belongs to a session.
    Persistent,
    /// Deleted in a flush that has not been committed yet.
    Deleted,
    /// Had a row, but its session is gone.
    Detached,
}

/// The value of a relationship attribute.
#[derive(Debug, Clone)]
pub enum Related {
    One(Option<Instance>),
    Many(Vec<Instance>),
}

impl Related {
    /// Empty value for a scalar (`uselist == false`) or collection attribute.
    #[must_use]
    pub fn empty(uselist: bool) -> Self {
        if uselist {
            Related::Many(Vec::new())
        } else {
            Related::One(None)
        }
    }

    #[must_use]
    pub fn one(&self) -> Option<&Instance> {
        match self {
            Related::One(one) => one.as_ref(),
            Related::Many(_) => None,
        }
    }

    /// Members as a slice (zero or one element for scalars).
    #[must_use]
    pub fn many(&self) -> &[Instance] {
        match self {
            Related::One(Some(one)) => std::slice::from_ref(one),
            Related::One(None) => &[],
            Related::Many(items) => items,
        }
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Instance> {
        match self {
            Related::One(one) => one.into_iter().collect(),
            Related::Many(items) => items,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.many().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.many().is_empty()
    }

    #[must_use]
    pub fn contains(&self, instance: &Instance) -> bool {
        self.many().iter().any(|i| i.same(instance))
    }
}

/// Loads what an instance does not hold yet.
///
/// Implemented by the session; instances keep a weak reference to it.
pub trait LazyLoader: Send + Sync {
    /// Load the related object(s) of `instance` for `relationship`.
    fn load_relationship(&self, instance: &Instance, relationship: &RelationshipInfo) -> Result<Related>;

    /// Reload the column values of an expired `instance`.
    fn refresh(&self, instance: &Instance) -> Result<()>;
}

/// A value assigned to an attribute: plain data or related instance(s).
#[derive(Debug, Clone)]
pub enum AttrValue {
    Value(Value),
    One(Option<Instance>),
    Many(Vec<Instance>),
}

impl AttrValue {
    /// The plain value, if this is one.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            AttrValue::Value(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_attr_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AttrValue {
                fn from(v: $ty) -> Self {
                    AttrValue::Value(v.into())
                }
            }

            impl From<Option<$ty>> for AttrValue {
                fn from(v: Option<$ty>) -> Self {
                    AttrValue::Value(v.into())
                }
            }
        )*
    };
}

impl_attr_from_scalar! {
    bool, i32, i64, u32, f64, Decimal, String, &str, Vec<u8>,
    NaiveDate, NaiveTime, NaiveDateTime, TimeDelta, Uuid, serde_json::Value,
}

impl From<Value> for AttrValue {
    fn from(v: Value) -> Self {
        AttrValue::Value(v)
    }
}

impl From<Instance> for AttrValue {
    fn from(v: Instance) -> Self {
        AttrValue::One(Some(v))
    }
}

impl From<&Instance> for AttrValue {
    fn from(v: &Instance) -> Self {
        AttrValue::One(Some(v.clone()))
    }
}

impl From<Option<Instance>> for AttrValue {
    fn from(v: Option<Instance>) -> Self {
        AttrValue::One(v)
    }
}

impl From<Option<&Instance>> for AttrValue {
    fn from(v: Option<&Instance>) -> Self {
        AttrValue::One(v.cloned())
    }
}

impl From<Vec<Instance>> for AttrValue {
    fn from(v: Vec<Instance>) -> Self {
        AttrValue::Many(v)
    }
}

impl From<&[Instance]> for AttrValue {
    fn from(v: &[Instance]) -> Self {
        AttrValue::Many(v.to_vec())
    }
}

impl From<Related> for AttrValue {
    fn from(v: Related) -> Self {
        match v {
            Related::One(one) => AttrValue::One(one),
            Related::Many(items) => AttrValue::Many(items),
        }
    }
}

/// Keyword arguments: `(attribute, value)` pairs in call order.
pub type Kwargs = Vec<(String, AttrValue)>;

/// Build [`Kwargs`]: `kwargs! { "name" => "Deadpond", "age" => 30 }`.
#[macro_export]
macro_rules! kwargs {
    () => {
        ::std::vec::Vec::<(::std::string::String, $crate::AttrValue)>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        ::std::vec![$((::std::string::String::from($key), $crate::AttrValue::from($value))),+]
    };
}

/// Any object whose attributes can be read by name.
pub trait AttributeSource {
    fn attribute(&self, name: &str) -> Option<Value>;
}

/// Input accepted by [`Instance::model_validate`].
pub enum ValidateInput<'a> {
    Map(Kwargs),
    Json(serde_json::Value),
    /// Read attributes of another instance.
    Instance(&'a Instance),
    Object(&'a dyn AttributeSource),
}

impl From<Kwargs> for ValidateInput<'_> {
    fn from(v: Kwargs) -> Self {
        ValidateInput::Map(v)
    }
}

impl From<serde_json::Value> for ValidateInput<'_> {
    fn from(v: serde_json::Value) -> Self {
        ValidateInput::Json(v)
    }
}

impl<'a> From<&'a Instance> for ValidateInput<'a> {
    fn from(v: &'a Instance) -> Self {
        ValidateInput::Instance(v)
    }
}

impl<'a> From<&'a dyn AttributeSource> for ValidateInput<'a> {
    fn from(v: &'a dyn AttributeSource) -> Self {
        ValidateInput::Object(v)
    }
}

/// Output mode for dumps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DumpMode {
    /// Typed values.
    #[default]
    Python,
    /// JSON-compatible values (decimals, dates and UUIDs as strings).
    Json,
}

/// Options for [`Instance::model_dump`].
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    pub mode: DumpMode,
    pub include: Option<HashSet<String>>,
    pub exclude: HashSet<String>,
    pub by_alias: bool,
    pub exclude_unset: bool,
    pub exclude_defaults: bool,
    pub exclude_none: bool,
}

impl DumpOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: DumpMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn by_alias(mut self, value: bool) -> Self {
        self.by_alias = value;
        self
    }

    pub fn exclude_unset(mut self, value: bool) -> Self {
        self.exclude_unset = value;
        self
    }

    pub fn exclude_defaults(mut self, value: bool) -> Self {
        self.exclude_defaults = value;
        self
    }

    pub fn exclude_none(mut self, value: bool) -> Self {
        self.exclude_none = value;
        self
    }

    fn admits(&self, name: &str) -> bool {
        self.include.as_ref().is_none_or(|inc| inc.contains(name)) && !self.exclude.contains(name)
    }
}

/// Ordered result of [`Instance::model_dump`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelDump {
    entries: Vec<(String, Value)>,
}

impl ModelDump {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// As keyword arguments, for `sqlmodel_update` or construction.
    #[must_use]
    pub fn into_kwargs(self) -> Kwargs {
        self.entries
            .into_iter()
            .map(|(k, v)| (k, AttrValue::Value(v)))
            .collect()
    }

    /// As a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for ModelDump {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, &value.to_json())?;
        }
        map.end()
    }
}

/// Source accepted by [`Instance::sqlmodel_update`].
pub enum UpdateSource<'a> {
    Map(Kwargs),
    Dump(ModelDump),
    /// Fields explicitly set on another instance.
    Instance(&'a Instance),
}

impl From<Kwargs> for UpdateSource<'_> {
    fn from(v: Kwargs) -> Self {
        UpdateSource::Map(v)
    }
}

impl From<ModelDump> for UpdateSource<'_> {
    fn from(v: ModelDump) -> Self {
        UpdateSource::Dump(v)
    }
}

impl<'a> From<&'a Instance> for UpdateSource<'a> {
    fn from(v: &'a Instance) -> Self {
        UpdateSource::Instance(v)
    }
}

/// Persistence bookkeeping of a table-model instance.
#[derive(Debug)]
pub struct MapperState {
    state: ObjectState,
    /// Column values as last read from or written to the database.
    committed: Option<Vec<Value>>,
    dirty: FieldsSet,
    expired: bool,
    relations: HashMap<String, Related>,
    dirty_relations: BTreeSet<String>,
    loader: Option<Weak<dyn LazyLoader>>,
}

impl MapperState {
    fn new(fields: usize) -> Self {
        Self {
            state: ObjectState::Transient,
            committed: None,
            dirty: FieldsSet::empty(fields),
            expired: false,
            relations: HashMap::new(),
            dirty_relations: BTreeSet::new(),
            loader: None,
        }
    }
}

#[derive(Debug)]
struct InstanceData {
    values: Vec<Value>,
    fields_set: FieldsSet,
    extra: Vec<(String, Value)>,
    mapper: Option<MapperState>,
}

/// Shared handle to a model instance.
#[derive(Clone)]
pub struct Instance {
    model: Arc<ModelDescriptor>,
    inner: Arc<Mutex<InstanceData>>,
}

impl Instance {
    fn from_parts(
        model: &Arc<ModelDescriptor>,
        values: Vec<Value>,
        fields_set: FieldsSet,
        extra: Vec<(String, Value)>,
    ) -> Self {
        let mapper = model.is_table().then(|| MapperState::new(values.len()));
        Self {
            model: Arc::clone(model),
            inner: Arc::new(Mutex::new(InstanceData {
                values,
                fields_set,
                extra,
                mapper,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InstanceData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Construct from keyword arguments.
    ///
    /// Non-table models validate every field. Table models take values as
    /// given and fill unset fields from their defaults (null when there is
    /// none); relationship keywords are assigned as relationships. Keywords
    /// naming neither are rejected unless the model allows extras.
    pub fn construct(model: &Arc<ModelDescriptor>, kwargs: Kwargs) -> Result<Self> {
        let (entries, relations) = split_kwargs(model, kwargs)?;
        if model.is_table() {
            Self::construct_unvalidated(model, entries, relations)
        } else {
            Self::validate_entries(model, entries, relations, UnknownKeys::Reject)
        }
    }

    /// Validate `input` into a new instance of `model`.
    ///
    /// `update` entries override same-named entries of the input.
    pub fn model_validate<'a>(
        model: &Arc<ModelDescriptor>,
        input: impl Into<ValidateInput<'a>>,
        update: Option<Kwargs>,
    ) -> Result<Self> {
        let (mut entries, mut relations) = match input.into() {
            ValidateInput::Map(kwargs) => split_kwargs(model, kwargs)?,
            ValidateInput::Json(serde_json::Value::Object(map)) => (
                map.iter()
                    .map(|(k, v)| (k.clone(), json_input_value(model, k, v)))
                    .collect(),
                Vec::new(),
            ),
            ValidateInput::Json(other) => {
                let mut err = ValidationError::new(model.name());
                err.push(FieldValidationError::new(
                    "__root__",
                    ValidationErrorKind::Type,
                    format!("Input should be a valid dictionary or instance, got {other}"),
                ));
                return Err(err.into());
            }
            ValidateInput::Instance(source) => (source.attributes_for(model)?, Vec::new()),
            ValidateInput::Object(source) => (
                model
                    .fields()
                    .iter()
                    .filter_map(|f| source.attribute(&f.name).map(|v| (f.name.clone(), v)))
                    .collect(),
                Vec::new(),
            ),
        };
        if let Some(update) = update {
            let (extra_entries, extra_relations) = split_kwargs(model, update)?;
            for (key, value) in extra_entries {
                entries.retain(|(k, _)| *k != key);
                entries.push((key, value));
            }
            for (key, value) in extra_relations {
                relations.retain(|(k, _)| *k != key);
                relations.push((key, value));
            }
        }
        Self::validate_entries(model, entries, relations, UnknownKeys::FromConfig)
    }

    /// Rebuild an instance from a database row (column values in field
    /// order). The fields-set record stays empty.
    #[must_use]
    pub fn from_row(model: &Arc<ModelDescriptor>, values: Vec<Value>) -> Self {
        let len = model.fields().len();
        let instance = Self::from_parts(model, vec![Value::Null; len], FieldsSet::empty(len), Vec::new());
        instance.load_row(values);
        instance
    }

    fn construct_unvalidated(
        model: &Arc<ModelDescriptor>,
        entries: Vec<(String, Value)>,
        relations: Kwargs,
    ) -> Result<Self> {
        let fields = model.fields();
        let mut provided: Vec<Option<Value>> = vec![None; fields.len()];
        let mut extra = Vec::new();
        let mut errors = ValidationError::new(model.name());
        for (key, value) in entries {
            match model.field_for_key(&key) {
                Some(idx) => provided[idx] = Some(value),
                None => route_extra(model, UnknownKeys::Reject, key, value, &mut extra, &mut errors),
            }
        }
        errors.into_result()?;

        let fields_set = FieldsSet::from_indices(
            fields.len(),
            provided.iter().enumerate().filter(|(_, v)| v.is_some()).map(|(i, _)| i),
        );
        let values = provided
            .into_iter()
            .zip(fields)
            .map(|(v, f)| v.or_else(|| f.info.default.produce()).unwrap_or(Value::Null))
            .collect();
        let instance = Self::from_parts(model, values, fields_set, extra);
        for (key, value) in relations {
            instance.set(&key, value)?;
        }
        Ok(instance)
    }

    fn validate_entries(
        model: &Arc<ModelDescriptor>,
        entries: Vec<(String, Value)>,
        relations: Kwargs,
        unknown: UnknownKeys,
    ) -> Result<Self> {
        let fields = model.fields();
        let mut provided: Vec<Option<Value>> = vec![None; fields.len()];
        let mut extra = Vec::new();
        let mut errors = ValidationError::new(model.name());
        for (key, value) in entries {
            match model.field_for_key(&key) {
                Some(idx) => provided[idx] = Some(value),
                None => route_extra(model, unknown, key, value, &mut extra, &mut errors),
            }
        }

        let mut values = Vec::with_capacity(fields.len());
        let mut fields_set = FieldsSet::empty(fields.len());
        for (idx, (field, input)) in fields.iter().zip(provided).enumerate() {
            let value = match input {
                Some(raw) => {
                    fields_set.set(idx);
                    match validate_value(&field.name, &field.annotation, &field.info, raw) {
                        Ok(v) => v,
                        Err(failures) => {
                            for failure in failures {
                                errors.push(failure);
                            }
                            Value::Null
                        }
                    }
                }
                None => field.info.default.produce().unwrap_or_else(|| {
                    errors.push(FieldValidationError::new(
                        &field.name,
                        ValidationErrorKind::Missing,
                        "Field required",
                    ));
                    Value::Null
                }),
            };
            values.push(value);
        }
        errors.into_result()?;

        let instance = Self::from_parts(model, values, fields_set, extra);
        if model.is_table() {
            for (key, value) in relations {
                instance.set(&key, value)?;
            }
        }
        tracing::trace!(model = model.name(), "Validated instance");
        Ok(instance)
    }

    /// Attribute values of `self` for the fields of `target`.
    fn attributes_for(&self, target: &ModelDescriptor) -> Result<Vec<(String, Value)>> {
        let mut out = Vec::new();
        for field in target.fields() {
            if self.model.field_index(&field.name).is_some() {
                out.push((field.name.clone(), self.get(&field.name)?));
            } else if let Some(v) = self.extra_value(&field.name) {
                out.push((field.name.clone(), v));
            }
        }
        Ok(out)
    }

    #[must_use]
    pub fn model(&self) -> &Arc<ModelDescriptor> {
        &self.model
    }

    /// True if both handles refer to the same object.
    #[must_use]
    pub fn same(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn extra_value(&self, name: &str) -> Option<Value> {
        self.lock()
            .extra
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    /// Read a data attribute, an extra attribute or a class attribute.
    ///
    /// Expired attributes are reloaded first.
    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(idx) = self.model.field_index(name) {
            self.ensure_loaded(name)?;
            return Ok(self.lock().values[idx].clone());
        }
        if let Some(value) = self.extra_value(name) {
            return Ok(value);
        }
        if let Some(value) = self.model.class_attr(name) {
            return Ok(value.clone());
        }
        if self.model.relationship(name).is_some() {
            return Err(Error::Config(format!(
                "{}.{name} is a relationship; read it with related()",
                self.model.name()
            )));
        }
        Err(Error::Config(format!(
            "'{}' object has no attribute '{name}'",
            self.model.name()
        )))
    }

    /// Read any attribute, relationships included.
    pub fn attr(&self, name: &str) -> Result<AttrValue> {
        if self.model.relationship(name).is_some() {
            return self.related(name).map(AttrValue::from);
        }
        self.get(name).map(AttrValue::Value)
    }

    /// Assign an attribute.
    ///
    /// Data fields are validated when the model sets `validate_assignment`.
    /// Relationship assignments also update the reciprocal attribute of the
    /// related instances in memory.
    pub fn set(&self, name: &str, value: impl Into<AttrValue>) -> Result<()> {
        let value = value.into();
        if let Some(idx) = self.model.field_index(name) {
            let field = &self.model.fields()[idx];
            let AttrValue::Value(value) = value else {
                return Err(Error::Config(format!(
                    "{}.{name} is a data field; assign a value, not an instance",
                    self.model.name()
                )));
            };
            let value = if self.model.config().validate_assignment {
                validate_value(&field.name, &field.annotation, &field.info, value).map_err(|failures| {
                    let mut err = ValidationError::new(self.model.name());
                    for failure in failures {
                        err.push(failure);
                    }
                    Error::Validation(err)
                })?
            } else {
                value
            };
            let mut guard = self.lock();
            let data = &mut *guard;
            data.fields_set.set(idx);
            if let Some(mapper) = data.mapper.as_mut() {
                match &mapper.committed {
                    Some(committed) if committed[idx] == value => mapper.dirty.unset(idx),
                    _ => mapper.dirty.set(idx),
                }
            }
            data.values[idx] = value;
            return Ok(());
        }

        if let Some(rel) = self.model.relationship(name) {
            let rel = rel.clone();
            return self.set_related(&rel, value);
        }

        if self.model.config().extra == ExtraFieldsBehavior::Allow {
            let Some(value) = value.into_value() else {
                return Err(Error::Config(format!(
                    "cannot store an instance in extra attribute '{name}'"
                )));
            };
            let mut data = self.lock();
            data.extra.retain(|(k, _)| k != name);
            data.extra.push((name.to_string(), value));
            return Ok(());
        }
        Err(Error::Config(format!(
            "'{}' object has no field '{name}'",
            self.model.name()
        )))
    }

    fn set_related(&self, rel: &RelationshipInfo, value: AttrValue) -> Result<()> {
        let new = match (value, rel.uselist) {
            (AttrValue::One(one), false) => Related::One(one),
            (AttrValue::Value(Value::Null), false) => Related::One(None),
            (AttrValue::Many(items), true) => Related::Many(items),
            (_, uselist) => {
                return Err(Error::Config(format!(
                    "{}.{} expects {}",
                    self.model.name(),
                    rel.name,
                    if uselist { "a list of instances" } else { "a single instance or None" }
                )));
            }
        };
        if let Some(wrong) = new.many().iter().find(|i| i.model.id() != rel.target) {
            return Err(Error::Config(format!(
                "{}.{} expects {} instances, got {}",
                self.model.name(),
                rel.name,
                rel.related_model,
                wrong.model.name()
            )));
        }

        let old = {
            let mut data = self.lock();
            let mapper = data.mapper.as_mut().ok_or_else(|| {
                Error::Config(format!("{} is not a table model", self.model.name()))
            })?;
            mapper.dirty_relations.insert(rel.name.clone());
            mapper.relations.insert(rel.name.clone(), new.clone())
        };

        if let Some(back) = &rel.back_populates {
            let old = old.map(Related::into_vec).unwrap_or_default();
            let new = new.into_vec();
            for gone in old.iter().filter(|o| !new.iter().any(|n| n.same(o))) {
                gone.unlink_reciprocal(back, self);
            }
            for added in new.iter().filter(|n| !old.iter().any(|o| o.same(n))) {
                added.link_reciprocal(back, self);
            }
        }
        Ok(())
    }

    /// Record `other` in this instance's reciprocal attribute `attr`.
    fn link_reciprocal(&self, attr: &str, other: &Instance) {
        let Some(rel) = self.model.relationship(attr) else { return };
        let previous = {
            let mut data = self.lock();
            let Some(mapper) = data.mapper.as_mut() else { return };
            let unbound = mapper.loader.is_none() || mapper.state == ObjectState::Transient;
            if rel.uselist {
                match mapper.relations.get_mut(attr) {
                    Some(Related::Many(items)) => {
                        if !items.iter().any(|i| i.same(other)) {
                            items.push(other.clone());
                        }
                    }
                    None if unbound => {
                        mapper
                            .relations
                            .insert(attr.to_string(), Related::Many(vec![other.clone()]));
                    }
                    _ => {}
                }
                None
            } else {
                if rel.holds_foreign_key() {
                    mapper.dirty_relations.insert(attr.to_string());
                }
                mapper
                    .relations
                    .insert(attr.to_string(), Related::One(Some(other.clone())))
                    .and_then(|r| r.one().cloned())
            }
        };
        if let (Some(previous), Some(back)) = (previous, &rel.back_populates) {
            if !previous.same(other) {
                previous.unlink_reciprocal(back, self);
            }
        }
    }

    /// Drop `other` from this instance's reciprocal attribute `attr`.
    fn unlink_reciprocal(&self, attr: &str, other: &Instance) {
        let Some(rel) = self.model.relationship(attr) else { return };
        let mut data = self.lock();
        let Some(mapper) = data.mapper.as_mut() else { return };
        match mapper.relations.get_mut(attr) {
            Some(Related::Many(items)) => items.retain(|i| !i.same(other)),
            Some(Related::One(current)) if current.as_ref().is_some_and(|c| c.same(other)) => {
                *current = None;
                if rel.holds_foreign_key() {
                    mapper.dirty_relations.insert(attr.to_string());
                }
            }
            _ => {}
        }
    }

    /// Read a relationship attribute, loading it on first access.
    pub fn related(&self, name: &str) -> Result<Related> {
        let rel = self.model.relationship(name).cloned().ok_or_else(|| {
            Error::Config(format!(
                "'{}' object has no relationship '{name}'",
                self.model.name()
            ))
        })?;
        let loader = {
            let mut data = self.lock();
            let Some(mapper) = data.mapper.as_mut() else {
                return Ok(Related::empty(rel.uselist));
            };
            if let Some(loaded) = mapper.relations.get(name) {
                return Ok(loaded.clone());
            }
            match rel.lazy {
                LazyStrategy::Raise => {
                    return Err(Error::LazyLoadRaised {
                        model: self.model.name().to_string(),
                        attribute: name.to_string(),
                    });
                }
                LazyStrategy::NoLoad => return Ok(Related::empty(rel.uselist)),
                LazyStrategy::Select | LazyStrategy::Selectin => {}
            }
            if mapper.state == ObjectState::Transient {
                let empty = Related::empty(rel.uselist);
                mapper.relations.insert(name.to_string(), empty.clone());
                return Ok(empty);
            }
            mapper.loader.clone()
        };
        let loader = loader.and_then(|w| w.upgrade()).ok_or_else(|| Error::DetachedInstance {
            model: self.model.name().to_string(),
            attribute: name.to_string(),
        })?;
        let loaded = loader.load_relationship(self, &rel)?;
        self.set_loaded_related(name, loaded.clone());
        Ok(loaded)
    }

    /// Append `item` to the collection `name`.
    pub fn append(&self, name: &str, item: &Instance) -> Result<()> {
        let Related::Many(mut items) = self.related(name)? else {
            return Err(Error::Config(format!(
                "{}.{name} is not a collection",
                self.model.name()
            )));
        };
        if !items.iter().any(|i| i.same(item)) {
            items.push(item.clone());
        }
        self.set(name, items)
    }

    /// Remove `item` from the collection `name`.
    pub fn remove(&self, name: &str, item: &Instance) -> Result<()> {
        let Related::Many(mut items) = self.related(name)? else {
            return Err(Error::Config(format!(
                "{}.{name} is not a collection",
                self.model.name()
            )));
        };
        items.retain(|i| !i.same(item));
        self.set(name, items)
    }

    fn ensure_loaded(&self, attribute: &str) -> Result<()> {
        let loader = {
            let data = self.lock();
            match &data.mapper {
                Some(mapper) if mapper.expired => mapper.loader.clone(),
                _ => return Ok(()),
            }
        };
        let loader = loader.and_then(|w| w.upgrade()).ok_or_else(|| Error::DetachedInstance {
            model: self.model.name().to_string(),
            attribute: attribute.to_string(),
        })?;
        loader.refresh(self)
    }

    /// Dump field values (and allowed extras) in declaration order.
    pub fn model_dump(&self, options: &DumpOptions) -> Result<ModelDump> {
        self.ensure_loaded("model_dump")?;
        let data = self.lock();
        let mut entries = Vec::new();
        for (idx, field) in self.model.fields().iter().enumerate() {
            if field.info.exclude || !options.admits(&field.name) {
                continue;
            }
            if options.exclude_unset && !data.fields_set.is_set(idx) {
                continue;
            }
            let value = &data.values[idx];
            if options.exclude_none && value.is_null() {
                continue;
            }
            if options.exclude_defaults {
                if let FieldDefault::Value(default) = &field.info.default {
                    if default == value {
                        continue;
                    }
                }
            }
            let key = if options.by_alias {
                field.info.output_name(&field.name)
            } else {
                field.name.as_str()
            };
            entries.push((key.to_string(), render(value, options.mode)));
        }
        for (key, value) in &data.extra {
            if !options.admits(key) || (options.exclude_none && value.is_null()) {
                continue;
            }
            entries.push((key.clone(), render(value, options.mode)));
        }
        Ok(ModelDump { entries })
    }

    /// Dump to a JSON string, keys in declaration order.
    pub fn model_dump_json(&self, options: &DumpOptions) -> Result<String> {
        let options = options.clone().mode(DumpMode::Json);
        let dump = self.model_dump(&options)?;
        serde_json::to_string(&dump).map_err(|e| Error::Custom(e.to_string()))
    }

    /// Assign every entry of `source`, then every entry of `update`.
    ///
    /// Keys of `source` that name neither a field nor a relationship are
    /// skipped; keys of `update` are assigned unconditionally.
    pub fn sqlmodel_update<'a>(
        &self,
        source: impl Into<UpdateSource<'a>>,
        update: Option<Kwargs>,
    ) -> Result<()> {
        let entries = match source.into() {
            UpdateSource::Map(kwargs) => kwargs,
            UpdateSource::Dump(dump) => dump.into_kwargs(),
            UpdateSource::Instance(other) => other
                .model_dump(&DumpOptions::new().exclude_unset(true))?
                .into_kwargs(),
        };
        for (key, value) in entries {
            let known = self.model.field_index(&key).is_some()
                || self.model.relationship(&key).is_some()
                || self.model.config().extra == ExtraFieldsBehavior::Allow;
            if known {
                self.set(&key, value)?;
            }
        }
        for (key, value) in update.into_iter().flatten() {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Names of the fields explicitly provided or assigned.
    #[must_use]
    pub fn model_fields_set(&self) -> Vec<String> {
        let data = self.lock();
        data.fields_set
            .iter()
            .map(|idx| self.model.fields()[idx].name.clone())
            .collect()
    }

    /// Extra attributes kept under `extra = Allow`.
    #[must_use]
    pub fn model_extra(&self) -> Vec<(String, Value)> {
        self.lock().extra.clone()
    }

    // ========================================================================
    // Persistence hooks (used by the session)
    // ========================================================================

    /// Lifecycle state; always `Transient` for non-table models.
    #[must_use]
    pub fn state(&self) -> ObjectState {
        self.lock()
            .mapper
            .as_ref()
            .map_or(ObjectState::Transient, |m| m.state)
    }

    pub fn set_state(&self, state: ObjectState) {
        if let Some(mapper) = self.lock().mapper.as_mut() {
            mapper.state = state;
        }
    }

    /// Attach to a loader (the owning session).
    pub fn bind(&self, loader: Weak<dyn LazyLoader>) {
        if let Some(mapper) = self.lock().mapper.as_mut() {
            mapper.loader = Some(loader);
        }
    }

    /// Detach from the owning session.
    pub fn unbind(&self) {
        if let Some(mapper) = self.lock().mapper.as_mut() {
            mapper.loader = None;
            mapper.state = match mapper.state {
                ObjectState::Persistent | ObjectState::Deleted | ObjectState::Detached => {
                    ObjectState::Detached
                }
                ObjectState::Pending | ObjectState::Transient => ObjectState::Transient,
            };
        }
    }

    /// True if bound to `loader`.
    #[must_use]
    pub fn is_bound_to(&self, loader: &Weak<dyn LazyLoader>) -> bool {
        self.lock()
            .mapper
            .as_ref()
            .and_then(|m| m.loader.as_ref())
            .is_some_and(|bound| Weak::ptr_eq(bound, loader))
    }

    /// True if bound to a loader that is still alive.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.lock()
            .mapper
            .as_ref()
            .and_then(|m| m.loader.as_ref())
            .is_some_and(|w| w.strong_count() > 0)
    }

    /// Raw field values, without reloading.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.lock().values.clone()
    }

    #[must_use]
    pub fn value_at(&self, idx: usize) -> Value {
        self.lock().values.get(idx).cloned().unwrap_or_default()
    }

    /// Write a field value without validation, marking it dirty.
    pub fn set_value_at(&self, idx: usize, value: Value) {
        let mut guard = self.lock();
        let data = &mut *guard;
        if idx >= data.values.len() {
            return;
        }
        if let Some(mapper) = data.mapper.as_mut() {
            match &mapper.committed {
                Some(committed) if committed[idx] == value => mapper.dirty.unset(idx),
                _ => mapper.dirty.set(idx),
            }
        }
        data.values[idx] = value;
    }

    /// Primary-key values, in key order.
    #[must_use]
    pub fn primary_key_values(&self) -> Vec<Value> {
        let data = self.lock();
        self.model
            .primary_key()
            .iter()
            .map(|idx| data.values[*idx].clone())
            .collect()
    }

    /// Primary-key values as last committed, if the row exists.
    #[must_use]
    pub fn committed_primary_key(&self) -> Option<Vec<Value>> {
        let data = self.lock();
        let committed = data.mapper.as_ref()?.committed.as_ref()?;
        Some(
            self.model
                .primary_key()
                .iter()
                .map(|idx| committed[*idx].clone())
                .collect(),
        )
    }

    /// Indices of fields changed since the last flush or load.
    #[must_use]
    pub fn dirty_fields(&self) -> Vec<usize> {
        self.lock()
            .mapper
            .as_ref()
            .map(|m| m.dirty.iter().collect())
            .unwrap_or_default()
    }

    /// Relationship attributes assigned since the last flush.
    #[must_use]
    pub fn dirty_relationships(&self) -> Vec<String> {
        self.lock()
            .mapper
            .as_ref()
            .map(|m| m.dirty_relations.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_dirty_relationships(&self) {
        if let Some(mapper) = self.lock().mapper.as_mut() {
            mapper.dirty_relations.clear();
        }
    }

    /// True if fields or relationships changed since the last flush or load.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.lock()
            .mapper
            .as_ref()
            .is_some_and(|m| !m.dirty.none_set() || !m.dirty_relations.is_empty())
    }

    /// Loaded value of a relationship, without loading.
    #[must_use]
    pub fn loaded_related(&self, name: &str) -> Option<Related> {
        self.lock()
            .mapper
            .as_ref()
            .and_then(|m| m.relations.get(name).cloned())
    }

    /// Store a loaded relationship value without marking it changed.
    pub fn set_loaded_related(&self, name: &str, value: Related) {
        if let Some(mapper) = self.lock().mapper.as_mut() {
            mapper.relations.insert(name.to_string(), value);
        }
    }

    /// Everything now matches the database: snapshot values, clear dirty
    /// fields and mark persistent.
    pub fn mark_persistent(&self) {
        let mut guard = self.lock();
        let data = &mut *guard;
        if let Some(mapper) = data.mapper.as_mut() {
            mapper.committed = Some(data.values.clone());
            mapper.dirty.clear();
            mapper.expired = false;
            mapper.state = ObjectState::Persistent;
        }
    }

    /// Apply a freshly read row. Fields changed in memory keep their value.
    pub fn load_row(&self, row: Vec<Value>) {
        let mut guard = self.lock();
        let data = &mut *guard;
        let Some(mapper) = data.mapper.as_mut() else { return };
        for (idx, value) in row.iter().enumerate().take(data.values.len()) {
            if !mapper.dirty.is_set(idx) {
                data.values[idx] = value.clone();
            }
        }
        mapper.committed = Some(row);
        mapper.expired = false;
        if matches!(mapper.state, ObjectState::Transient | ObjectState::Pending) {
            mapper.state = ObjectState::Persistent;
        }
    }

    /// Mark every attribute stale; the next read reloads.
    pub fn expire(&self) {
        if let Some(mapper) = self.lock().mapper.as_mut() {
            mapper.expired = true;
            mapper.relations.clear();
            mapper.dirty_relations.clear();
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.lock().mapper.as_ref().is_some_and(|m| m.expired)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(self.model.name());
        match self.inner.try_lock() {
            Ok(data) => {
                for (field, value) in self.model.fields().iter().zip(&data.values) {
                    out.field(&field.name, value);
                }
            }
            Err(_) => {
                out.field("..", &"<locked>");
            }
        }
        out.finish()
    }
}

impl PartialEq for Instance {
    /// Same model and equal field values.
    fn eq(&self, other: &Self) -> bool {
        if self.same(other) {
            return true;
        }
        if self.model.id() != other.model.id() {
            return false;
        }
        let mine = self.values();
        mine == other.values()
    }
}

impl ModelDescriptor {
    /// Shorthand for [`Instance::construct`].
    pub fn construct(self: &Arc<Self>, kwargs: Kwargs) -> Result<Instance> {
        Instance::construct(self, kwargs)
    }

    /// Shorthand for [`Instance::model_validate`].
    pub fn model_validate<'a>(
        self: &Arc<Self>,
        input: impl Into<ValidateInput<'a>>,
        update: Option<Kwargs>,
    ) -> Result<Instance> {
        Instance::model_validate(self, input, update)
    }
}

type Split = (Vec<(String, Value)>, Kwargs);

/// Separate plain values from relationship assignments.
fn split_kwargs(model: &ModelDescriptor, kwargs: Kwargs) -> Result<Split> {
    let mut entries = Vec::new();
    let mut relations = Vec::new();
    for (key, value) in kwargs {
        match value {
            AttrValue::Value(v) if model.relationship(&key).is_none() => entries.push((key, v)),
            value if model.relationship(&key).is_some() => relations.push((key, value)),
            _ => {
                return Err(Error::Config(format!(
                    "{}: '{key}' is not a relationship; pass a plain value",
                    model.name()
                )));
            }
        }
    }
    Ok((entries, relations))
}

/// Treatment of keys that name no field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnknownKeys {
    /// Keyword construction: only `Allow` admits them.
    Reject,
    /// Validation input: follow the model's `extra` setting.
    FromConfig,
}

fn route_extra(
    model: &ModelDescriptor,
    unknown: UnknownKeys,
    key: String,
    value: Value,
    extra: &mut Vec<(String, Value)>,
    errors: &mut ValidationError,
) {
    match (model.config().extra, unknown) {
        (ExtraFieldsBehavior::Allow, _) => extra.push((key, value)),
        (ExtraFieldsBehavior::Ignore, UnknownKeys::FromConfig) => {}
        (ExtraFieldsBehavior::Forbid | ExtraFieldsBehavior::Ignore, _) => errors.push(FieldValidationError::new(
            key,
            ValidationErrorKind::ExtraForbidden,
            "Extra inputs are not permitted",
        )),
    }
}

/// Value of one JSON input key; base64 text for a bytes field is decoded.
fn json_input_value(model: &ModelDescriptor, key: &str, json: &serde_json::Value) -> Value {
    let value = Value::from_json(json);
    let Some(idx) = model.field_for_key(key) else { return value };
    if let (Value::Text(text), Ok(Annotation::Bytes)) = (&value, model.fields()[idx].annotation.unwrap_optional()) {
        if let Ok(bytes) = STANDARD.decode(text) {
            return Value::Bytes(bytes);
        }
    }
    value
}

fn render(value: &Value, mode: DumpMode) -> Value {
    match mode {
        DumpMode::Python => value.clone(),
        DumpMode::Json => Value::from_json(&value.to_json()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Annotation;
    use crate::field::Field;
    use crate::kwargs;
    use crate::model::ModelBuilder;
    use crate::registry::Registry;
    use crate::relationship::Relationship;
    use crate::schema::Schema;

    fn schema() -> Arc<Schema> {
        let mut registry = Registry::new();
        ModelBuilder::table("Team")
            .field("id", Annotation::optional(Annotation::Int), Field::new().default(Value::Null).primary_key(true))
            .annotate("name", Annotation::Str)
            .relationship(
                "heroes",
                Annotation::list(Annotation::model("Hero")),
                Relationship::new().back_populates("team"),
            )
            .declare(&mut registry)
            .unwrap();
        ModelBuilder::new("HeroBase")
            .field("name", Annotation::Str, Field::new().index(true).min_length(2))
            .with_default("age", Annotation::optional(Annotation::Int), Value::Null)
            .field(
                "secret_name",
                Annotation::Str,
                Field::new().alias("secretName"),
            )
            .declare(&mut registry)
            .unwrap();
        ModelBuilder::table("Hero")
            .inherits("HeroBase")
            .field("id", Annotation::optional(Annotation::Int), Field::new().default(Value::Null).primary_key(true))
            .field(
                "team_id",
                Annotation::optional(Annotation::Int),
                Field::new().default(Value::Null).foreign_key("team.id"),
            )
            .relationship(
                "team",
                Annotation::optional(Annotation::model("Team")),
                Relationship::new().back_populates("heroes"),
            )
            .declare(&mut registry)
            .unwrap();
        ModelBuilder::new("HeroCreate")
            .inherits("HeroBase")
            .declare(&mut registry)
            .unwrap();
        ModelBuilder::new("HeroUpdate")
            .with_default("name", Annotation::optional(Annotation::Str), Value::Null)
            .with_default("age", Annotation::optional(Annotation::Int), Value::Null)
            .declare(&mut registry)
            .unwrap();
        registry.build().unwrap()
    }

    #[test]
    fn test_non_table_model_validates_on_construct() {
        let schema = schema();
        let create = schema.model("HeroCreate").unwrap();
        let err = create
            .construct(kwargs! { "name" => "D", "age" => "old" })
            .unwrap_err();
        let err = err.as_validation().unwrap();
        assert!(err.has("name", ValidationErrorKind::TooShort));
        assert!(err.has("age", ValidationErrorKind::Type));
        assert!(err.has("secret_name", ValidationErrorKind::Missing));
    }

    #[test]
    fn test_alias_accepted_on_input_and_used_by_alias_dump() {
        let schema = schema();
        let create = schema.model("HeroCreate").unwrap();
        let hero = create
            .construct(kwargs! { "name" => "Deadpond", "secretName" => "Dive Wilson", "age" => "30" })
            .unwrap();
        assert_eq!(hero.get("age").unwrap(), Value::BigInt(30));
        let dump = hero.model_dump(&DumpOptions::new().by_alias(true)).unwrap();
        assert_eq!(dump.get("secretName"), Some(&Value::Text("Dive Wilson".into())));
        assert!(!dump.contains_key("secret_name"));
    }

    #[test]
    fn test_table_model_skips_validation() {
        let schema = schema();
        let hero = schema.model("Hero").unwrap();
        let h = hero.construct(kwargs! { "name" => "D" }).unwrap();
        assert_eq!(h.get("name").unwrap(), Value::Text("D".into()));
        assert_eq!(h.get("secret_name").unwrap(), Value::Null);
        assert_eq!(h.get("id").unwrap(), Value::Null);
        assert_eq!(h.state(), ObjectState::Transient);
    }

    #[test]
    fn test_construct_rejects_unknown_keywords() {
        let schema = schema();
        for name in ["HeroCreate", "Hero"] {
            let model = schema.model(name).unwrap();
            let err = model
                .construct(kwargs! { "name" => "Deadpond", "secret_name" => "Dive Wilson", "bogus" => 1 })
                .unwrap_err();
            let err = err.as_validation().unwrap();
            assert!(err.has("bogus", ValidationErrorKind::ExtraForbidden), "{name}");
        }
    }

    #[test]
    fn test_validation_input_drops_unknown_keys() {
        let schema = schema();
        let create = schema.model("HeroCreate").unwrap();
        let hero = create
            .model_validate(
                serde_json::json!({ "name": "Deadpond", "secret_name": "Dive Wilson", "bogus": 1 }),
                None,
            )
            .unwrap();
        assert!(hero.model_extra().is_empty());
        assert!(!hero.model_dump(&DumpOptions::new()).unwrap().contains_key("bogus"));
    }

    #[test]
    fn test_allowed_extras_are_kept_on_construct() {
        let mut registry = Registry::new();
        ModelBuilder::new("Tagged")
            .annotate("name", Annotation::Str)
            .extra(ExtraFieldsBehavior::Allow)
            .declare(&mut registry)
            .unwrap();
        let schema = registry.build().unwrap();
        let tagged = schema
            .model("Tagged")
            .unwrap()
            .construct(kwargs! { "name" => "Deadpond", "power" => "healing" })
            .unwrap();
        assert_eq!(tagged.model_extra(), vec![("power".to_string(), Value::from("healing"))]);
    }

    #[test]
    fn test_model_validate_table_from_data_model() {
        let schema = schema();
        let create = schema.model("HeroCreate").unwrap();
        let hero = schema.model("Hero").unwrap();
        let source = create
            .construct(kwargs! { "name" => "Deadpond", "secret_name" => "Dive Wilson" })
            .unwrap();
        let db_hero = hero
            .model_validate(&source, Some(kwargs! { "age" => 42 }))
            .unwrap();
        assert_eq!(db_hero.get("name").unwrap(), Value::Text("Deadpond".into()));
        assert_eq!(db_hero.get("age").unwrap(), Value::BigInt(42));
        assert_eq!(db_hero.get("id").unwrap(), Value::Null);
    }

    #[test]
    fn test_model_validate_json_and_exclude_unset() {
        let schema = schema();
        let update = schema.model("HeroUpdate").unwrap();
        let patch = update
            .model_validate(serde_json::json!({ "age": 31 }), None)
            .unwrap();
        let dump = patch.model_dump(&DumpOptions::new().exclude_unset(true)).unwrap();
        assert_eq!(dump.keys().collect::<Vec<_>>(), vec!["age"]);

        let hero = schema.model("Hero").unwrap();
        let h = hero
            .construct(kwargs! { "name" => "Deadpond", "secret_name" => "Dive Wilson", "age" => 20 })
            .unwrap();
        h.sqlmodel_update(dump, None).unwrap();
        assert_eq!(h.get("age").unwrap(), Value::BigInt(31));
        assert_eq!(h.get("name").unwrap(), Value::Text("Deadpond".into()));
    }

    #[test]
    fn test_model_validate_rejects_non_object_json() {
        let schema = schema();
        let update = schema.model("HeroUpdate").unwrap();
        let err = update.model_validate(serde_json::json!([1, 2]), None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_relationship_assignment_back_populates() {
        let schema = schema();
        let team = schema
            .model("Team")
            .unwrap()
            .construct(kwargs! { "name" => "Preventers" })
            .unwrap();
        let hero_model = schema.model("Hero").unwrap();
        let rusty = hero_model
            .construct(kwargs! { "name" => "Rusty-Man", "secret_name" => "Tommy", "team" => &team })
            .unwrap();
        let heroes = team.related("heroes").unwrap();
        assert_eq!(heroes.len(), 1);
        assert!(heroes.contains(&rusty));

        let spider = hero_model
            .construct(kwargs! { "name" => "Spider-Boy", "secret_name" => "Pedro" })
            .unwrap();
        team.append("heroes", &spider).unwrap();
        assert!(spider.related("team").unwrap().one().unwrap().same(&team));

        team.remove("heroes", &rusty).unwrap();
        assert!(rusty.related("team").unwrap().one().is_none());
        assert!(rusty.dirty_relationships().contains(&"team".to_string()));
    }

    #[test]
    fn test_relationship_type_checked() {
        let schema = schema();
        let team = schema
            .model("Team")
            .unwrap()
            .construct(kwargs! { "name" => "Preventers" })
            .unwrap();
        let other = schema
            .model("Team")
            .unwrap()
            .construct(kwargs! { "name" => "Z-Force" })
            .unwrap();
        assert!(team.set("heroes", vec![other]).is_err());
        assert!(team.set("heroes", &team).is_err());
    }

    #[test]
    fn test_dirty_tracking_against_committed_snapshot() {
        let schema = schema();
        let hero = schema.model("Hero").unwrap();
        let h = Instance::from_row(
            hero,
            vec![
                Value::Text("Deadpond".into()),
                Value::Null,
                Value::Text("Dive Wilson".into()),
                Value::BigInt(1),
                Value::Null,
            ],
        );
        assert_eq!(h.state(), ObjectState::Persistent);
        assert!(h.model_fields_set().is_empty());
        assert!(!h.has_changes());

        h.set("age", 30).unwrap();
        assert_eq!(h.dirty_fields(), vec![1]);
        h.set("age", Value::Null).unwrap();
        assert!(h.dirty_fields().is_empty());
        assert_eq!(h.primary_key_values(), vec![Value::BigInt(1)]);
    }

    #[test]
    fn test_expired_without_session_is_detached() {
        let schema = schema();
        let hero = schema.model("Hero").unwrap();
        let h = Instance::from_row(hero, vec![Value::Null; 5]);
        h.expire();
        let err = h.get("name").unwrap_err();
        assert!(matches!(err, Error::DetachedInstance { ref attribute, .. } if attribute == "name"));
    }

    #[test]
    fn test_persistent_unbound_relationship_is_detached() {
        let schema = schema();
        let hero = schema.model("Hero").unwrap();
        let h = Instance::from_row(hero, vec![Value::Null; 5]);
        assert!(matches!(h.related("team"), Err(Error::DetachedInstance { .. })));
    }

    #[test]
    fn test_dump_json_keeps_declaration_order() {
        let schema = schema();
        let create = schema.model("HeroCreate").unwrap();
        let hero = create
            .construct(kwargs! { "secret_name" => "Dive Wilson", "name" => "Deadpond" })
            .unwrap();
        let json = hero.model_dump_json(&DumpOptions::new()).unwrap();
        assert_eq!(json, r#"{"name":"Deadpond","age":null,"secret_name":"Dive Wilson"}"#);
        let json = hero.model_dump_json(&DumpOptions::new().exclude_none(true)).unwrap();
        assert_eq!(json, r#"{"name":"Deadpond","secret_name":"Dive Wilson"}"#);
    }

    #[test]
    fn test_bytes_round_trip_through_json() {
        let mut registry = Registry::new();
        ModelBuilder::new("Blob")
            .annotate("data", Annotation::Bytes)
            .declare(&mut registry)
            .unwrap();
        let schema = registry.build().unwrap();
        let blob = schema.model("Blob").unwrap();
        let raw = vec![0_u8, 159, 146, 150];
        let original = blob.construct(kwargs! { "data" => raw.clone() }).unwrap();

        let json = original.model_dump_json(&DumpOptions::new()).unwrap();
        assert_eq!(json, r#"{"data":"AJ+Slg=="}"#);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let restored = blob.model_validate(parsed, None).unwrap();
        assert_eq!(restored.get("data").unwrap(), Value::Bytes(raw));
    }

    #[test]
    fn test_unknown_attribute() {
        let schema = schema();
        let hero = schema.model("Hero").unwrap();
        let h = hero.construct(kwargs! { "name" => "X" }).unwrap();
        assert!(h.get("powers").is_err());
        assert!(h.set("powers", 3).is_err());
    }
}
