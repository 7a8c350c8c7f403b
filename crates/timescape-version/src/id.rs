//! Artifact and version identifiers
//!
//! [`VersionId`] is the Timescape Version identifier (TSV) with wire format
//! `tsv:<epochMillis>-<name>-<seq>`.

use crate::error::VersionError;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Wire prefix of every TSV
pub const TSV_PREFIX: &str = "tsv:";

/// Identifier of a versioned artifact (handler or module)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Create an artifact id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An artifact id must be non-empty and free of whitespace
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.chars().any(char::is_whitespace)
    }
}

impl Display for ArtifactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ArtifactId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Timescape Version identifier
///
/// Ordering is `(epoch_millis, name, seq)`, which is only a storage order;
/// resolution orders versions by `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionId {
    epoch_millis: u64,
    name: String,
    seq: u32,
}

impl VersionId {
    /// Build a TSV from its parts
    ///
    /// # Errors
    /// Returns [`VersionError::InvalidVersionId`] if `name` is empty or
    /// contains whitespace.
    pub fn new(epoch_millis: u64, name: impl Into<String>, seq: u32) -> Result<Self, VersionError> {
        let name = name.into();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(VersionError::InvalidVersionId {
                input: format!("{TSV_PREFIX}{epoch_millis}-{name}-{seq}"),
                reason: "name must be non-empty and contain no whitespace",
            });
        }
        Ok(Self {
            epoch_millis,
            name,
            seq,
        })
    }

    /// Millisecond timestamp component
    #[inline]
    #[must_use]
    pub fn epoch_millis(&self) -> u64 {
        self.epoch_millis
    }

    /// Name component
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sequence component
    #[inline]
    #[must_use]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// True if `(epoch_millis, name)` match, regardless of `seq`
    #[must_use]
    pub fn same_slot(&self, epoch_millis: u64, name: &str) -> bool {
        self.epoch_millis == epoch_millis && self.name == name
    }
}

impl Display for VersionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{TSV_PREFIX}{}-{}-{}", self.epoch_millis, self.name, self.seq)
    }
}

impl FromStr for VersionId {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| VersionError::InvalidVersionId {
            input: s.to_string(),
            reason,
        };

        let body = s
            .strip_prefix(TSV_PREFIX)
            .ok_or_else(|| invalid("missing `tsv:` prefix"))?;
        // Names may contain '-', so millis is split on the first dash and
        // seq on the last.
        let (millis, rest) = body
            .split_once('-')
            .ok_or_else(|| invalid("expected `<epochMillis>-<name>-<seq>`"))?;
        let (name, seq) = rest
            .rsplit_once('-')
            .ok_or_else(|| invalid("expected `<epochMillis>-<name>-<seq>`"))?;

        let epoch_millis = millis
            .parse::<u64>()
            .map_err(|_| invalid("epochMillis is not an unsigned integer"))?;
        let seq = seq
            .parse::<u32>()
            .map_err(|_| invalid("seq is not an unsigned integer"))?;
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }

        Self::new(epoch_millis, name, seq).map_err(|_| invalid("name contains whitespace"))
    }
}

impl serde::Serialize for VersionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for VersionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_wire_format() {
        let id: VersionId = "tsv:1700000000000-checkout-3".parse().unwrap();
        assert_eq!(id.epoch_millis(), 1_700_000_000_000);
        assert_eq!(id.name(), "checkout");
        assert_eq!(id.seq(), 3);
        assert_eq!(id.to_string(), "tsv:1700000000000-checkout-3");
    }

    #[test]
    fn name_may_contain_dashes() {
        let id: VersionId = "tsv:42-price-service-v2-0".parse().unwrap();
        assert_eq!(id.name(), "price-service-v2");
        assert_eq!(id.seq(), 0);
    }

    #[test]
    fn rejects_malformed() {
        for bad in [
            "1700-checkout-1",
            "tsv:",
            "tsv:abc-checkout-1",
            "tsv:17-checkout",
            "tsv:17--1",
            "tsv:17-checkout-x",
            "tsv:17-check out-1",
        ] {
            assert!(bad.parse::<VersionId>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn serde_uses_wire_format() {
        let id = VersionId::new(5, "orders", 1).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"tsv:5-orders-1\"");
        let back: VersionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn artifact_id_validity() {
        assert!(ArtifactId::from("checkout").is_valid());
        assert!(!ArtifactId::from("").is_valid());
        assert!(!ArtifactId::from("check out").is_valid());
    }

    proptest! {
        #[test]
        fn display_parse_agree(millis in any::<u64>(), name in "[a-z][a-z0-9-]{0,12}", seq in any::<u32>()) {
            let id = VersionId::new(millis, name, seq).unwrap();
            let parsed: VersionId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
