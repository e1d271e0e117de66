//! Addressing strings embedded in schema annotations.
//!
//! A full annotation reads `<backend>:<module>:<export>`. The outer dispatcher
//! consumes the backend tag with [`TaggedReference::parse`] and hands the
//! remaining `<module>:<export>` to the selected backend, which decodes it with
//! [`ValidatorReference::parse`]. Backends never see the tag.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, ValidatorError};

/// Separator between addressing components.
pub const DELIMITER: char = ':';

/// Closed set of validator backends an annotation may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Sandboxed WebAssembly module.
    Wasm,
    /// Natively compiled plugin.
    Native,
    /// Interpreted script.
    Script,
}

impl Backend {
    /// Tag used in addressing strings.
    pub fn tag(self) -> &'static str {
        match self {
            Backend::Wasm => "wasm",
            Backend::Native => "native",
            Backend::Script => "script",
        }
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Backend {
    type Err = ValidatorError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "wasm" => Ok(Backend::Wasm),
            "native" => Ok(Backend::Native),
            "script" => Ok(Backend::Script),
            other => Err(ValidatorError::Addressing(
                ErrorInfo::new(
                    "addressing.unknown_backend",
                    format!("unknown backend tag {other:?}"),
                )
                .with_hint("expected one of wasm, native, script"),
            )),
        }
    }
}

/// Annotation split into its backend and the backend-specific remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedReference<'a> {
    /// Backend selected by the tag.
    pub backend: Backend,
    /// Everything after the tag, handed to the backend verbatim.
    pub target: &'a str,
}

impl<'a> TaggedReference<'a> {
    /// Splits off the leading backend tag. The remainder is not inspected.
    pub fn parse(annotation: &'a str) -> Result<Self, ValidatorError> {
        let (tag, target) = annotation.split_once(DELIMITER).ok_or_else(|| {
            ValidatorError::Addressing(
                ErrorInfo::new(
                    "addressing.missing_backend",
                    format!("expected <backend>:<target> but got {annotation}"),
                )
                .with_context("reference", annotation),
            )
        })?;
        let backend = tag
            .parse::<Backend>()
            .map_err(|err| err.with_context("reference", annotation))?;
        Ok(Self { backend, target })
    }
}

/// Module identifier and exported function selected by an addressing string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorReference {
    /// Registry key of the sandboxed unit.
    pub module: String,
    /// Name of the exported function to invoke.
    pub export: String,
}

impl ValidatorReference {
    /// Decodes `<module>:<export>`.
    ///
    /// Exactly two non-empty components are accepted. A string that still
    /// carries a backend tag has three components and is rejected.
    pub fn parse(reference: &str) -> Result<Self, ValidatorError> {
        let parts: Vec<&str> = reference.split(DELIMITER).collect();
        match parts.as_slice() {
            [module, export] if !module.is_empty() && !export.is_empty() => Ok(Self {
                module: (*module).to_string(),
                export: (*export).to_string(),
            }),
            _ => Err(ValidatorError::Addressing(
                ErrorInfo::new(
                    "addressing.malformed",
                    format!("expected <module>:<function-name> but got {reference}"),
                )
                .with_context("reference", reference)
                .with_context("components", parts.len().to_string()),
            )),
        }
    }
}

impl Display for ValidatorReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{DELIMITER}{}", self.module, self.export)
    }
}
