use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a module's raw bytes.
pub fn compute_module_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
