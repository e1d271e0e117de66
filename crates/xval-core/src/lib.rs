#![deny(missing_docs)]
#![doc = "Capability contracts, outcomes and addressing shared by extended-resource field validator backends."]

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod errors;
pub mod reference;

pub use errors::{ErrorInfo, ErrorKind, ValidatorError};
pub use reference::{Backend, TaggedReference, ValidatorReference, DELIMITER};

/// Opaque schema description handed through to validators untouched.
pub type Schema = Value;

/// Ordered path segments locating a field inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Builds a path from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Returns the path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True for the document root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for FieldPath {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        f.write_str(&self.0.join("."))
    }
}

/// Verdict of a single validation call.
///
/// `Invalid` rejects the object. `Error` means the validator itself is unusable
/// and must never be reported to users as a rejection of their object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The value passed.
    Valid,
    /// The validator rejected the value.
    Invalid {
        /// Caller-facing explanation produced by the validator.
        message: String,
    },
    /// The validator could not produce a verdict.
    Error(ValidatorError),
}

impl ValidationOutcome {
    /// Builds an `Invalid` outcome.
    pub fn invalid(message: impl Into<String>) -> Self {
        ValidationOutcome::Invalid {
            message: message.into(),
        }
    }

    /// True when the value passed.
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }

    /// Rejection message, if the validator rejected the value.
    pub fn rejection(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Invalid { message } => Some(message),
            _ => None,
        }
    }

    /// Error, if the validator could not produce a verdict.
    pub fn error(&self) -> Option<&ValidatorError> {
        match self {
            ValidationOutcome::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidatorError> for ValidationOutcome {
    fn from(err: ValidatorError) -> Self {
        ValidationOutcome::Error(err)
    }
}

/// Validates individual field values against custom logic.
pub trait FormatValidator: Send + Sync {
    /// Checks `value` located at `field_path` with the validator selected by `reference`.
    fn validate(
        &self,
        field_path: &FieldPath,
        reference: &str,
        schema: &Schema,
        value: &Value,
    ) -> ValidationOutcome;

    /// Checks that the validator selected by `reference` is usable, without any runtime data.
    fn validate_program(
        &self,
        field_path: &FieldPath,
        reference: &str,
        schema: &Schema,
    ) -> Result<(), ValidatorError>;
}

/// Inputs of a conversion between two schema versions.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionRequest<'a> {
    /// Location of the converted field.
    pub field_path: &'a FieldPath,
    /// Addressing string selecting the converter; not sent to the converter.
    #[serde(skip)]
    pub reference: &'a str,
    /// Version the value is currently expressed in.
    pub current_version: &'a str,
    /// Version the value must be converted to.
    pub target_version: &'a str,
    /// Schema of `current_version`.
    pub current_schema: &'a Schema,
    /// Schema of `target_version`.
    pub target_schema: &'a Schema,
    /// Value to convert.
    pub value: &'a Value,
}

/// Migrates field values between schema versions.
pub trait Converter: Send + Sync {
    /// Returns `request.value` expressed at `request.target_version`.
    fn convert(&self, request: &ConversionRequest<'_>) -> Result<Value, ValidatorError>;
}
