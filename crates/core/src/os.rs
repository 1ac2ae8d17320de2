//! Canonical operating-system identifiers.
//!
//! The patch catalog partitions rows under `OS#<name>` while the instance
//! directory tags machines with the bare `<name>`. Both sides are reduced to
//! one canonical form by [`OsKey::parse`] (trim, strip one `OS#` prefix,
//! trim again) before any comparison happens.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Prefix the patch catalog uses for its partition keys.
pub const CATALOG_KEY_PREFIX: &str = "OS#";

/// Maximum length of a canonical OS identifier.
const MAX_OS_KEY_LEN: usize = 256;

/// A normalized operating-system identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OsKey(String);

impl OsKey {
    /// Normalize a raw identifier from either source into its canonical form.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let canonical = normalize(raw);
        if canonical.is_empty() {
            return Err(CoreError::Validation(format!(
                "OS identifier must not be empty (got {raw:?})"
            )));
        }
        if canonical.chars().count() > MAX_OS_KEY_LEN {
            return Err(CoreError::Validation(format!(
                "OS identifier exceeds {MAX_OS_KEY_LEN} characters"
            )));
        }
        Ok(Self(canonical.to_string()))
    }

    /// The canonical identifier, without any prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Partition key used by the patch catalog (`OS#<canonical>`).
    pub fn catalog_partition_key(&self) -> String {
        format!("{CATALOG_KEY_PREFIX}{}", self.0)
    }

    /// Whether a directory OS tag refers to this OS after normalization.
    pub fn matches_tag(&self, tag: &str) -> bool {
        normalize(tag) == self.0
    }
}

fn normalize(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix(CATALOG_KEY_PREFIX)
        .unwrap_or(trimmed)
        .trim()
}

impl fmt::Display for OsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OsKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OsKey> for String {
    fn from(value: OsKey) -> Self {
        value.0
    }
}
