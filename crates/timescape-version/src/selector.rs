//! Version selectors
//!
//! The request envelope carries one optional string; [`Selector::parse`]
//! maps it onto an explicit TSV, a semantic tag, an ISO-8601 instant or
//! `latest`.

use crate::error::VersionError;
use crate::id::{VersionId, TSV_PREFIX};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt::{self, Display, Formatter};

/// Keyword for the newest routable version
pub const LATEST: &str = "latest";

/// How a request names the version it was written against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Exact TSV lookup
    Id(VersionId),
    /// Exact match against `Version::tag`
    Tag(String),
    /// Greatest `created_at <= instant`
    At(DateTime<Utc>),
    /// Greatest `created_at` among routable versions
    Latest,
}

impl Selector {
    /// Parse the wire form; `None` and blank strings mean latest.
    ///
    /// # Errors
    /// Returns [`VersionError::InvalidSelector`] for a malformed TSV or for
    /// input shaped like a date that is not a valid instant.
    pub fn parse(input: Option<&str>) -> Result<Self, VersionError> {
        let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Selector::Latest);
        };

        if raw.eq_ignore_ascii_case(LATEST) {
            return Ok(Selector::Latest);
        }

        if raw.starts_with(TSV_PREFIX) {
            return raw
                .parse::<VersionId>()
                .map(Selector::Id)
                .map_err(|e| VersionError::InvalidSelector {
                    input: raw.to_string(),
                    reason: e.to_string(),
                });
        }

        if let Some(at) = parse_instant(raw) {
            return Ok(Selector::At(at));
        }

        if looks_like_date(raw) {
            return Err(VersionError::InvalidSelector {
                input: raw.to_string(),
                reason: "not a valid ISO-8601 timestamp".to_string(),
            });
        }

        Ok(Selector::Tag(raw.to_string()))
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Id(id) => write!(f, "{id}"),
            Selector::Tag(tag) => f.write_str(tag),
            Selector::At(at) => write!(f, "{}", at.to_rfc3339()),
            Selector::Latest => f.write_str(LATEST),
        }
    }
}

impl From<VersionId> for Selector {
    fn from(id: VersionId) -> Self {
        Selector::Id(id)
    }
}

impl From<DateTime<Utc>> for Selector {
    fn from(at: DateTime<Utc>) -> Self {
        Selector::At(at)
    }
}

/// RFC 3339, naive date-time (UTC) or bare date (UTC midnight)
fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

/// `YYYY-MM-DD` prefix
fn looks_like_date(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}
