//! Type annotations attached to declared attributes.
//!
//! An [`Annotation`] is the run-time description of a field's declared type,
//! the information a validator needs to coerce values and the synthesizer
//! needs to pick a storage type. Model references may be forward references
//! ([`ModelRef::Unresolved`]) that are resolved when the registry is built.

use std::fmt;

/// Handle to a model declared in a [`crate::Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub usize);

impl ModelId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Reference to a model: either already resolved or a name to resolve later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRef {
    Resolved(ModelId),
    Unresolved(String),
}

impl From<ModelId> for ModelRef {
    fn from(id: ModelId) -> Self {
        ModelRef::Resolved(id)
    }
}

impl From<&str> for ModelRef {
    fn from(name: &str) -> Self {
        ModelRef::Unresolved(name.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(name: String) -> Self {
        ModelRef::Unresolved(name)
    }
}

/// A string-valued enumeration type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumType {
    pub fn new<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, variant: &str) -> bool {
        self.variants.iter().any(|v| v == variant)
    }
}

/// Declared type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    Str,
    Int,
    Float,
    Bool,
    DateTime,
    Date,
    Time,
    Duration,
    Bytes,
    Decimal,
    Uuid,
    Enum(EnumType),
    IpAddr,
    IpNetwork,
    Path,
    /// Free-form JSON document.
    Json,
    Any,
    /// The none type itself.
    NoneType,
    Optional(Box<Annotation>),
    Union(Vec<Annotation>),
    List(Box<Annotation>),
    Model(ModelRef),
}

impl Annotation {
    #[must_use]
    pub fn optional(inner: Annotation) -> Self {
        Annotation::Optional(Box::new(inner))
    }

    #[must_use]
    pub fn list(inner: Annotation) -> Self {
        Annotation::List(Box::new(inner))
    }

    #[must_use]
    pub fn union(arms: impl IntoIterator<Item = Annotation>) -> Self {
        Annotation::Union(arms.into_iter().collect())
    }

    /// A (possibly forward) reference to another model.
    #[must_use]
    pub fn model(target: impl Into<ModelRef>) -> Self {
        Annotation::Model(target.into())
    }

    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Annotation::Enum(EnumType::new(name, variants))
    }

    /// True if `None` is an acceptable value.
    #[must_use]
    pub fn admits_none(&self) -> bool {
        match self {
            Annotation::NoneType | Annotation::Optional(_) | Annotation::Any => true,
            Annotation::Union(arms) => arms.iter().any(Annotation::admits_none),
            _ => false,
        }
    }

    /// The arms that are not the none type, with nested optionals and
    /// unions flattened.
    #[must_use]
    pub fn non_none_arms(&self) -> Vec<&Annotation> {
        let mut out = Vec::new();
        self.collect_arms(&mut out);
        out
    }

    fn collect_arms<'a>(&'a self, out: &mut Vec<&'a Annotation>) {
        match self {
            Annotation::NoneType => {}
            Annotation::Optional(inner) => inner.collect_arms(out),
            Annotation::Union(arms) => {
                for arm in arms {
                    arm.collect_arms(out);
                }
            }
            other => out.push(other),
        }
    }

    /// Strip optional wrappers, requiring exactly one non-none arm.
    ///
    /// Returns a description of the offending shape when the annotation is a
    /// real union.
    pub fn unwrap_optional(&self) -> Result<&Annotation, String> {
        let arms = self.non_none_arms();
        match arms.as_slice() {
            [single] => Ok(*single),
            [] => Err(format!("'{self}' has no non-None type")),
            _ => Err(format!(
                "'{self}' is a union of several types; only Optional[T] is supported here"
            )),
        }
    }

    /// The referenced model and whether it is a collection, for relationship
    /// annotations (`T`, `Optional[T]`, `List[T]`, `Optional[List[T]]`).
    pub fn relationship_target(&self) -> Result<(&ModelRef, bool), String> {
        match self.unwrap_optional()? {
            Annotation::Model(target) => Ok((target, false)),
            Annotation::List(inner) => match inner.unwrap_optional()? {
                Annotation::Model(target) => Ok((target, true)),
                other => Err(format!("'List[{other}]' does not reference a model")),
            },
            other => Err(format!("'{other}' does not reference a model")),
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::Str => f.write_str("str"),
            Annotation::Int => f.write_str("int"),
            Annotation::Float => f.write_str("float"),
            Annotation::Bool => f.write_str("bool"),
            Annotation::DateTime => f.write_str("datetime"),
            Annotation::Date => f.write_str("date"),
            Annotation::Time => f.write_str("time"),
            Annotation::Duration => f.write_str("timedelta"),
            Annotation::Bytes => f.write_str("bytes"),
            Annotation::Decimal => f.write_str("Decimal"),
            Annotation::Uuid => f.write_str("UUID"),
            Annotation::Enum(e) => f.write_str(&e.name),
            Annotation::IpAddr => f.write_str("IPvAnyAddress"),
            Annotation::IpNetwork => f.write_str("IPvAnyNetwork"),
            Annotation::Path => f.write_str("Path"),
            Annotation::Json => f.write_str("dict"),
            Annotation::Any => f.write_str("Any"),
            Annotation::NoneType => f.write_str("None"),
            Annotation::Optional(inner) => write!(f, "Optional[{inner}]"),
            Annotation::Union(arms) => {
                f.write_str("Union[")?;
                for (i, arm) in arms.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arm}")?;
                }
                f.write_str("]")
            }
            Annotation::List(inner) => write!(f, "List[{inner}]"),
            Annotation::Model(ModelRef::Unresolved(name)) => write!(f, "'{name}'"),
            Annotation::Model(ModelRef::Resolved(id)) => write!(f, "<model #{}>", id.0),
        }
    }
}
