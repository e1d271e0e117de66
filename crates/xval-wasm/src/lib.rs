//! Sandboxed WebAssembly backend for extended-resource field validators.
//!
//! Guest modules are compiled and instantiated once by a [`ModuleRegistry`]
//! and stay resident. A [`WasmValidator`] resolves `<module>:<export>`
//! references against the registry and invokes the export under an
//! [`ExecutionBudget`], exchanging canonical JSON through guest memory.

#![deny(missing_docs)]

mod abi;
mod config;
mod hash;
mod instance;
mod loader;
mod registry;
mod sandbox;
mod serde;
mod validator;

pub use abi::{
    verify_abi_compat, ConversionReply, PackedRegion, ABI_VERSION_EXPORT, ALLOC_EXPORT,
    MEMORY_EXPORT, XVAL_ABI_VERSION,
};
pub use config::HostConfig;
pub use hash::compute_module_digest;
pub use loader::{load_host_config, read_module_bytes, resolve_module_path, MAX_MODULE_BYTES};
pub use registry::{ModuleInfo, ModuleRegistry, RegistryStats};
pub use sandbox::{BudgetDecision, BudgetEvent, BudgetGuard, ExecutionBudget};
pub use serde::{from_json_slice, to_canonical_json_bytes};
pub use validator::WasmValidator;
