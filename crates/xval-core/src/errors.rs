//! Structured error types shared by every validator backend.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`ValidatorError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (field path, reference, module, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

/// Fieldless discriminant of [`ValidatorError`], convenient for matching in callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Module bytes are not a valid compiled unit.
    Compile,
    /// The sandbox runtime refused to instantiate a compiled module.
    Instantiation,
    /// The addressing string could not be decoded.
    Addressing,
    /// No module is registered under the requested identifier.
    ModuleNotRegistered,
    /// The module does not export the requested function.
    ExportNotFound,
    /// The sandboxed call or the marshaling boundary failed.
    Infrastructure,
    /// The guest refused to perform a conversion.
    Rejected,
    /// Module bytes or configuration could not be read.
    Load,
    /// Encoding or decoding of a payload failed.
    Serde,
}

/// Canonical error type for validator backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum ValidatorError {
    /// Module bytes failed to compile.
    #[error("compile error: {0}")]
    Compile(ErrorInfo),
    /// Compiled module failed to instantiate.
    #[error("instantiation error: {0}")]
    Instantiation(ErrorInfo),
    /// Malformed addressing string.
    #[error("addressing error: {0}")]
    Addressing(ErrorInfo),
    /// Reference names an identifier with no live instance.
    #[error("module not registered: {0}")]
    ModuleNotRegistered(ErrorInfo),
    /// Reference names an export the module does not provide.
    #[error("export not found: {0}")]
    ExportNotFound(ErrorInfo),
    /// Trap, exhausted budget, or broken marshaling boundary.
    #[error("infrastructure error: {0}")]
    Infrastructure(ErrorInfo),
    /// Well-formed refusal returned by a converter.
    #[error("rejected: {0}")]
    Rejected(ErrorInfo),
    /// Filesystem errors while loading modules or configuration.
    #[error("load error: {0}")]
    Load(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl ValidatorError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            ValidatorError::Compile(info)
            | ValidatorError::Instantiation(info)
            | ValidatorError::Addressing(info)
            | ValidatorError::ModuleNotRegistered(info)
            | ValidatorError::ExportNotFound(info)
            | ValidatorError::Infrastructure(info)
            | ValidatorError::Rejected(info)
            | ValidatorError::Load(info)
            | ValidatorError::Serde(info) => info,
        }
    }

    fn info_mut(&mut self) -> &mut ErrorInfo {
        match self {
            ValidatorError::Compile(info)
            | ValidatorError::Instantiation(info)
            | ValidatorError::Addressing(info)
            | ValidatorError::ModuleNotRegistered(info)
            | ValidatorError::ExportNotFound(info)
            | ValidatorError::Infrastructure(info)
            | ValidatorError::Rejected(info)
            | ValidatorError::Load(info)
            | ValidatorError::Serde(info) => info,
        }
    }

    /// Returns the family of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidatorError::Compile(_) => ErrorKind::Compile,
            ValidatorError::Instantiation(_) => ErrorKind::Instantiation,
            ValidatorError::Addressing(_) => ErrorKind::Addressing,
            ValidatorError::ModuleNotRegistered(_) => ErrorKind::ModuleNotRegistered,
            ValidatorError::ExportNotFound(_) => ErrorKind::ExportNotFound,
            ValidatorError::Infrastructure(_) => ErrorKind::Infrastructure,
            ValidatorError::Rejected(_) => ErrorKind::Rejected,
            ValidatorError::Load(_) => ErrorKind::Load,
            ValidatorError::Serde(_) => ErrorKind::Serde,
        }
    }

    /// True for errors caused by a misconfigured schema or a missing deployment step.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Addressing | ErrorKind::ModuleNotRegistered | ErrorKind::ExportNotFound
        )
    }

    /// True when the sandboxed call itself failed.
    pub fn is_infrastructure(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }

    /// Adds a context entry without changing the error family.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info_mut().context.insert(key.into(), value.into());
        self
    }
}
