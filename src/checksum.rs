//! Checksums for exported schema snapshots

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 checksum of snapshot content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum over a sequence of JSON values.
    ///
    /// serde_json keeps object keys sorted, so equal documents hash equally
    /// regardless of the key order in their source files.
    pub fn from_json_parts(parts: &[&serde_json::Value]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            let canonical = serde_json::to_vec(part).unwrap_or_default();
            hasher.update((canonical.len() as u64).to_be_bytes());
            hasher.update(&canonical);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checksum_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(Checksum::from_json_parts(&[&a]), Checksum::from_json_parts(&[&b]));
    }

    #[test]
    fn test_checksum_parts_are_delimited() {
        let left = Checksum::from_json_parts(&[&json!("ab"), &json!("c")]);
        let right = Checksum::from_json_parts(&[&json!("a"), &json!("bc")]);
        assert_ne!(left, right);
    }

    #[test]
    fn test_checksum_is_hex_sha256() {
        let checksum = Checksum::from_json_parts(&[&json!(null)]);
        assert_eq!(checksum.as_str().len(), 64);
        assert!(checksum.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(checksum.to_string(), checksum.as_str());
    }
}
