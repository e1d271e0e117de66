use std::fs;
use std::path::{Path, PathBuf};

use xval_core::{ErrorInfo, ValidatorError};

use crate::config::HostConfig;

/// Largest module file the host will read.
pub const MAX_MODULE_BYTES: u64 = 50 * 1024 * 1024;

/// Reads and validates a TOML [`HostConfig`].
pub fn load_host_config(path: &Path) -> Result<HostConfig, ValidatorError> {
    let contents = fs::read_to_string(path).map_err(|err| {
        ValidatorError::Load(
            ErrorInfo::new("config.read", format!("failed to read host config: {err}"))
                .with_context("path", path.display().to_string()),
        )
    })?;
    let config: HostConfig = toml::from_str(&contents).map_err(|err| {
        ValidatorError::Serde(
            ErrorInfo::new("config.parse", err.to_string())
                .with_context("path", path.display().to_string()),
        )
    })?;
    config.validate()?;
    Ok(config)
}

/// Maps a module identifier to the file holding its bytes.
pub fn resolve_module_path(root: Option<&Path>, identifier: &str) -> PathBuf {
    match root {
        Some(root) => root.join(identifier),
        None => PathBuf::from(identifier),
    }
}

/// Reads a module file, refusing anything above [`MAX_MODULE_BYTES`].
pub fn read_module_bytes(path: &Path) -> Result<Vec<u8>, ValidatorError> {
    let io_error = |err: std::io::Error| {
        ValidatorError::Load(
            ErrorInfo::new("module.read", format!("failed to read module: {err}"))
                .with_context("path", path.display().to_string()),
        )
    };
    let size = fs::metadata(path).map_err(io_error)?.len();
    if size > MAX_MODULE_BYTES {
        return Err(ValidatorError::Load(
            ErrorInfo::new(
                "module.too_large",
                format!("module is {size} bytes, limit is {MAX_MODULE_BYTES}"),
            )
            .with_context("path", path.display().to_string()),
        ));
    }
    fs::read(path).map_err(io_error)
}
