//! Knowledge-base (KB) patch identifiers.
//!
//! KB ids come from the patch catalog and are interpolated into the remote
//! script, so only a conservative character set is accepted.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum length of a KB identifier.
pub const MAX_KB_LEN: usize = 64;

/// Characters allowed in a KB identifier.
pub const KB_PATTERN: &str = r"^[A-Za-z0-9._-]+$";

static KB_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(KB_PATTERN).expect("valid regex"));

/// A validated KB identifier, e.g. `KB5001234`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KbId(String);

impl KbId {
    /// Validate a raw KB value. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let kb = raw.trim();
        if kb.is_empty() {
            return Err(CoreError::Validation("KB identifier must not be empty".into()));
        }
        if kb.len() > MAX_KB_LEN {
            return Err(CoreError::Validation(format!(
                "KB identifier exceeds {MAX_KB_LEN} characters"
            )));
        }
        if !KB_RE.is_match(kb) {
            return Err(CoreError::Validation(format!(
                "KB identifier {kb:?} contains unsupported characters"
            )));
        }
        Ok(Self(kb.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a KB reported by the remote script.
    ///
    /// The catalog may store `5001234` while the machine reports
    /// `KB5001234`, so a leading `KB` is ignored on both sides.
    pub fn matches_reported(&self, reported: &str) -> bool {
        strip_kb_prefix(&self.0).eq_ignore_ascii_case(strip_kb_prefix(reported.trim()))
    }
}

fn strip_kb_prefix(value: &str) -> &str {
    value
        .strip_prefix("KB")
        .or_else(|| value.strip_prefix("kb"))
        .unwrap_or(value)
}

impl fmt::Display for KbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for KbId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KbId> for String {
    fn from(value: KbId) -> Self {
        value.0
    }
}
