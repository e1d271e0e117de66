use serde::{Deserialize, Serialize};
use serde_json::Value;
use xval_core::{ErrorInfo, ValidatorError};

/// Guest ABI implemented by this host.
pub const XVAL_ABI_VERSION: i32 = 1;

/// Linear memory the host reads and writes payloads through.
pub const MEMORY_EXPORT: &str = "memory";
/// `alloc(len: i32) -> i32`, reserves `len` bytes of guest memory for the input payload.
pub const ALLOC_EXPORT: &str = "alloc";
/// Optional `abi_version() -> i32`.
pub const ABI_VERSION_EXPORT: &str = "abi_version";

/// Parameters of validator and converter exports: `(ptr, len)` of the input payload.
pub type EntryParams = (i32, i32);
/// Result of validator and converter exports, see [`PackedRegion`].
pub type EntryResult = i64;

/// Guest memory region returned by an entry point, packed as `(len << 32) | ptr`.
///
/// A raw value of `0` means the guest returned nothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PackedRegion {
    /// Offset into guest memory.
    pub ptr: u32,
    /// Length in bytes.
    pub len: u32,
}

impl PackedRegion {
    /// Unpacks an entry point result; `0` yields `None`.
    pub fn from_raw(raw: EntryResult) -> Option<Self> {
        if raw == 0 {
            return None;
        }
        let bits = raw as u64;
        Some(Self {
            ptr: (bits & 0xffff_ffff) as u32,
            len: (bits >> 32) as u32,
        })
    }

    /// Packs the region the way guests return it.
    pub fn to_raw(self) -> EntryResult {
        ((u64::from(self.len) << 32) | u64::from(self.ptr)) as i64
    }

    /// Byte range of the region within guest memory.
    pub fn range(self) -> std::ops::Range<usize> {
        let start = self.ptr as usize;
        start..start + self.len as usize
    }
}

/// Reply written by converter exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionReply {
    /// The value rewritten for the target version.
    Converted(Value),
    /// The converter refused, with a caller-facing reason.
    Rejected(String),
}

/// Checks the version a guest reports through `abi_version`.
pub fn verify_abi_compat(guest_version: i32) -> Result<(), ValidatorError> {
    if guest_version != XVAL_ABI_VERSION {
        return Err(ValidatorError::Infrastructure(
            ErrorInfo::new(
                "abi.version_mismatch",
                format!(
                    "module ABI {guest_version} is incompatible with host ABI {XVAL_ABI_VERSION}"
                ),
            )
            .with_context("guest_abi", guest_version.to_string()),
        ));
    }
    Ok(())
}
