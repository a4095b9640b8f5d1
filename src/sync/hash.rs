//! Checksums that decide whether a side changed since the last pass.
//!
//! A checksum is the hex SHA256 of a value's compact JSON. Work items hash
//! a projection of their semantic fields only, so a file copy and a database
//! copy with equal content agree regardless of timestamps or layout.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::error;

/// Hex SHA256 of `value` serialized as compact JSON.
///
/// JSON is streamed straight into the hasher. Serialization fails only for
/// maps with non-string keys or a `Serialize` impl that reports an error,
/// and the semantic projections hashed here contain neither. If it does
/// fail, the failure is logged and the digest covers the bytes written so
/// far.
#[must_use]
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let mut hasher = Sha256::new();
    if let Err(e) = serde_json::to_writer(&mut hasher, value) {
        error!(error = %e, "Checksum input could not be serialized");
    }
    format!("{:x}", hasher.finalize())
}

/// Whether `current` differs from the checksum recorded at the last pass.
/// No recorded checksum counts as a change.
#[must_use]
pub fn has_changed(current: &str, recorded: Option<&str>) -> bool {
    recorded != Some(current)
}
