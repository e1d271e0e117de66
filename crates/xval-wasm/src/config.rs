use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use xval_core::ValidatorError;

use crate::sandbox::ExecutionBudget;

/// TOML-configurable settings of the WebAssembly validator host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory relative module identifiers are resolved against.
    /// Identifiers are used as plain paths when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_root: Option<PathBuf>,
    /// Limits applied to every guest invocation.
    pub budget: ExecutionBudget,
    /// Modules registered when the validator is built from this config.
    pub preload: Vec<String>,
}

impl HostConfig {
    /// Validates the budget.
    pub fn validate(&self) -> Result<(), ValidatorError> {
        self.budget.validate()
    }
}
