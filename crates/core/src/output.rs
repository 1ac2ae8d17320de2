//! Parsing and bounding of remote command output.
//!
//! The patch script prints a JSON object `{"KB": ..., "RebootRequired": ...}`
//! as its last action, usually after some free-text progress lines. Output
//! that carries no such object may still contain the explicit text marker
//! `RebootRequired: True` / `RebootRequired: False`; anything else leaves the
//! reboot flag unknown.

use serde::Serialize;

use crate::job::RebootRequired;

/// Maximum number of characters of command output kept on a job.
pub const MAX_OUTPUT_LEN: usize = 500;

/// Text marker accepted when output is not structured.
pub const REBOOT_TRUE_MARKER: &str = "RebootRequired: True";

/// Text marker accepted when output is not structured.
pub const REBOOT_FALSE_MARKER: &str = "RebootRequired: False";

/// How a [`ParsedOutput`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputSource {
    /// A JSON object was found and decoded.
    Structured,
    /// No JSON object, but an explicit reboot marker was present.
    TextMarker,
    /// Nothing usable was found.
    Unparsed,
}

/// Fields extracted from command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOutput {
    pub reported_kb: Option<String>,
    pub reboot_required: RebootRequired,
    pub source: OutputSource,
}

impl ParsedOutput {
    fn unparsed() -> Self {
        Self {
            reported_kb: None,
            reboot_required: RebootRequired::Unknown,
            source: OutputSource::Unparsed,
        }
    }
}

/// Extract `{KB, RebootRequired}` from raw command output.
///
/// Tries the whole trimmed text first, then the outermost `{...}` block.
/// Never fails: unparseable output yields [`OutputSource::Unparsed`].
pub fn parse_patch_output(raw: &str) -> ParsedOutput {
    let text = raw.trim();
    if text.is_empty() {
        return ParsedOutput::unparsed();
    }

    if let Some(parsed) = parse_json_object(text).or_else(|| {
        embedded_object(text).and_then(parse_json_object)
    }) {
        return parsed;
    }

    let reboot_required = if text.contains(REBOOT_TRUE_MARKER) {
        RebootRequired::Yes
    } else if text.contains(REBOOT_FALSE_MARKER) {
        RebootRequired::No
    } else {
        return ParsedOutput::unparsed();
    };

    ParsedOutput {
        reported_kb: None,
        reboot_required,
        source: OutputSource::TextMarker,
    }
}

/// Truncate output to at most [`MAX_OUTPUT_LEN`] characters.
pub fn truncate_output(raw: &str) -> String {
    match raw.char_indices().nth(MAX_OUTPUT_LEN) {
        Some((byte_idx, _)) => raw[..byte_idx].to_string(),
        None => raw.to_string(),
    }
}

fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn parse_json_object(text: &str) -> Option<ParsedOutput> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;

    let reported_kb = match object.get("KB") {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let reboot_required: RebootRequired = object
        .get("RebootRequired")
        .and_then(serde_json::Value::as_bool)
        .into();

    Some(ParsedOutput {
        reported_kb,
        reboot_required,
        source: OutputSource::Structured,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
