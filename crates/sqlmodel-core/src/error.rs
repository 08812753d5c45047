//! Error types for SQLModel Rust.
//!
//! Every fallible operation in the workspace returns [`Result`], whose error is
//! the single [`Error`] enum below. Validation failures carry a structured
//! [`ValidationError`] so callers can inspect each failing field.

use std::fmt;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for all SQLModel operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A declaration-time contract was violated (mutually exclusive options,
    /// unsupported union shapes, unresolved references, missing reciprocal
    /// relationships, duplicate class names).
    #[error("configuration error: {0}")]
    Config(String),

    /// One or more fields failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A field annotation has no storage mapping and no explicit `sa_type`.
    #[error("cannot synthesize a column for {model}.{field}: {message}")]
    Synthesis {
        model: String,
        field: String,
        message: String,
    },

    /// Database access on an async-session instance outside the hand-off.
    #[error(
        "'{attribute}' requires database access outside the async hand-off; \
         use AsyncSession::run_sync, AsyncSession::load_related or AsyncSession::refresh"
    )]
    MissingHandoff { attribute: String },

    /// The instance is not bound to an open session.
    #[error("{model} instance is not bound to a session; attribute '{attribute}' cannot be loaded")]
    DetachedInstance { model: String, attribute: String },

    /// A relationship configured with `lazy="raise"` was accessed before loading.
    #[error("'{model}.{attribute}' is not available due to lazy='raise'")]
    LazyLoadRaised { model: String, attribute: String },

    /// A query expected exactly one row and found none.
    #[error("no row was found when one was required")]
    NoResultFound,

    /// A query expected at most one row and found several.
    #[error("multiple rows were found when exactly one was required (found {0})")]
    MultipleResultsFound(usize),

    /// Error reported by the database driver.
    #[error("database error: {0}")]
    Database(String),

    /// The blocking worker used by the async hand-off failed.
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Shorthand for [`Error::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// True if this is a validation error.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Borrow the structured validation error, if any.
    #[must_use]
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Error::Validation(err) => Some(err),
            _ => None,
        }
    }
}

/// The kind of a single field validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// A required field was not supplied.
    Missing,
    /// The value could not be coerced to the annotated type.
    Type,
    /// `None` was supplied for a field that does not admit it.
    NoneNotAllowed,
    /// Unknown key with `extra = "forbid"`.
    ExtraForbidden,
    TooShort,
    TooLong,
    Pattern,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    MaxDigits,
    DecimalPlaces,
    WholeDigits,
    /// The value is not one of the enum's variants.
    Enum,
}

impl ValidationErrorKind {
    /// Stable machine-readable code, matching the names validation users expect.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            ValidationErrorKind::Missing => "missing",
            ValidationErrorKind::Type => "type_error",
            ValidationErrorKind::NoneNotAllowed => "none_not_allowed",
            ValidationErrorKind::ExtraForbidden => "extra_forbidden",
            ValidationErrorKind::TooShort => "too_short",
            ValidationErrorKind::TooLong => "too_long",
            ValidationErrorKind::Pattern => "string_pattern_mismatch",
            ValidationErrorKind::GreaterThan => "greater_than",
            ValidationErrorKind::GreaterThanEqual => "greater_than_equal",
            ValidationErrorKind::LessThan => "less_than",
            ValidationErrorKind::LessThanEqual => "less_than_equal",
            ValidationErrorKind::MaxDigits => "decimal_max_digits",
            ValidationErrorKind::DecimalPlaces => "decimal_max_places",
            ValidationErrorKind::WholeDigits => "decimal_whole_digits",
            ValidationErrorKind::Enum => "enum",
        }
    }
}

/// A single failing field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValidationError {
    /// Location of the failure: the field name, followed by list indices for
    /// element errors.
    pub loc: Vec<String>,
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl FieldValidationError {
    pub fn new(field: impl Into<String>, kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            loc: vec![field.into()],
            kind,
            message: message.into(),
        }
    }

    /// The top-level field name this error belongs to.
    #[must_use]
    pub fn field(&self) -> &str {
        self.loc.first().map_or("", String::as_str)
    }
}

/// All field failures collected while validating one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub model: String,
    pub errors: Vec<FieldValidationError>,
}

impl ValidationError {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, error: FieldValidationError) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors reported for `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldValidationError> + 'a {
        self.errors.iter().filter(move |e| e.field() == field)
    }

    /// True if any error of `kind` was reported for `field`.
    #[must_use]
    pub fn has(&self, field: &str, kind: ValidationErrorKind) -> bool {
        self.for_field(field).any(|e| e.kind == kind)
    }

    /// `Ok(())` if nothing was collected, otherwise the error itself.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.errors.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.errors.len();
        write!(
            f,
            "{} validation error{} for {}",
            n,
            if n == 1 { "" } else { "s" },
            self.model
        )?;
        for err in &self.errors {
            write!(f, "\n{}\n  {} [type={}]", err.loc.join("."), err.message, err.kind.code())?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_lists_every_field() {
        let mut err = ValidationError::new("Hero");
        err.push(FieldValidationError::new(
            "name",
            ValidationErrorKind::Missing,
            "Field required",
        ));
        err.push(FieldValidationError::new(
            "age",
            ValidationErrorKind::GreaterThanEqual,
            "Input should be greater than or equal to 0",
        ));
        let text = err.to_string();
        assert!(text.starts_with("2 validation errors for Hero"));
        assert!(text.contains("name\n  Field required [type=missing]"));
        assert!(text.contains("[type=greater_than_equal]"));
    }

    #[test]
    fn test_into_result_empty_is_ok() {
        assert!(ValidationError::new("Hero").into_result().is_ok());
    }

    #[test]
    fn test_error_wraps_validation() {
        let mut inner = ValidationError::new("Item");
        inner.push(FieldValidationError::new(
            "price",
            ValidationErrorKind::MaxDigits,
            "too many digits",
        ));
        let err: Error = inner.into();
        assert!(err.is_validation());
        let v = err.as_validation().unwrap();
        assert!(v.has("price", ValidationErrorKind::MaxDigits));
        assert!(!v.has("price", ValidationErrorKind::Missing));
    }

    #[test]
    fn test_synthesis_message_names_field() {
        let err = Error::Synthesis {
            model: "Hero".into(),
            field: "tags".into(),
            message: "no storage type for List[str]".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot synthesize a column for Hero.tags: no storage type for List[str]"
        );
    }
}
