//! Content-addressed hashing primitives
//!
//! Provides [`ContentHash`], the 32-byte digest that guards a version id
//! against silent re-registration with different content.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte content hash (Blake3)
///
/// Immutable and cheap to clone (Copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create hash from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != 32 {
            return Err(HashError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Hash a JSON document in canonical form.
    ///
    /// `serde_json::Value` keeps object keys in a `BTreeMap` (the
    /// `preserve_order` feature is not enabled anywhere in the workspace), so
    /// two documents that differ only in key order hash identically.
    #[must_use]
    pub fn of_json(value: &serde_json::Value) -> Self {
        let mut hasher = blake3::Hasher::new();
        // Display for Value never fails and writes compact JSON.
        hasher.update(value.to_string().as_bytes());
        Self::new(*hasher.finalize().as_bytes())
    }

    /// Hash several parts with a separator between them
    #[must_use]
    pub fn chain(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
            hasher.update(&[0]);
        }
        Self::new(*hasher.finalize().as_bytes())
    }

    /// Check if hash is all zeros (genesis marker)
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl Default for ContentHash {
    fn default() -> Self {
        Self([0; 32])
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when working with content hashes
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Invalid hash length
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_hash_from_slice_invalid_length() {
        let bytes = vec![1u8; 31];
        let result = ContentHash::from_slice(&bytes);
        assert!(matches!(
            result,
            Err(HashError::InvalidLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn json_hash_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(ContentHash::of_json(&a), ContentHash::of_json(&b));
    }

    #[test]
    fn json_hash_sees_value_changes() {
        let a = json!({"price": "29.99"});
        let b = json!({"price": "30.00"});
        assert_ne!(ContentHash::of_json(&a), ContentHash::of_json(&b));
    }

    #[test]
    fn chain_separates_parts() {
        assert_ne!(
            ContentHash::chain(&[b"ab".as_slice(), b"c".as_slice()]),
            ContentHash::chain(&[b"a".as_slice(), b"bc".as_slice()])
        );
    }

    #[test]
    fn content_hash_display_and_parse() {
        let hash = ContentHash::of_json(&json!("test"));
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(hash.to_string().len(), 64);
    }

    #[test]
    fn content_hash_is_zero() {
        assert!(ContentHash::default().is_zero());
        assert!(!ContentHash::of_json(&json!("test")).is_zero());
    }

    #[test]
    fn content_hash_serde_json() {
        let hash = ContentHash::chain(&[b"test".as_slice()]);
        let encoded = serde_json::to_string(&hash).unwrap();
        let decoded: ContentHash = serde_json::from_str(&encoded).unwrap();
        assert_eq!(hash, decoded);
    }
}
