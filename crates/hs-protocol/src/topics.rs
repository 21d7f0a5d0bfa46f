//! AWS IoT device shadow topic builders and parsers.
//!
//! Topic structure (classic, unnamed shadow):
//! ```text
//! $aws/things/{thing}/shadow/update
//! $aws/things/{thing}/shadow/update/accepted
//! $aws/things/{thing}/shadow/update/rejected
//! $aws/things/{thing}/shadow/update/delta
//! $aws/things/{thing}/shadow/update/documents
//! ```
//!
//! The node builds the update topic and the two it subscribes to by
//! default; every response topic is recognised by `parse_shadow_topic`.

const PREFIX: &str = "$aws/things";

// ─── Shadow topics ───

pub fn shadow_update(thing: &str) -> String {
    format!("{PREFIX}/{thing}/shadow/update")
}

pub fn shadow_update_rejected(thing: &str) -> String {
    format!("{PREFIX}/{thing}/shadow/update/rejected")
}

pub fn shadow_update_delta(thing: &str) -> String {
    format!("{PREFIX}/{thing}/shadow/update/delta")
}


// ─── Topic parsing ───

/// Parsed shadow topic components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopic {
    pub thing: String,
    /// `update`, `get` or `delete`.
    pub operation: String,
    /// Response suffix (`accepted`, `rejected`, `delta`, `documents`), if any.
    pub response: Option<String>,
}

/// Parse a classic shadow topic into its components.
/// Returns `None` if the topic is not under `$aws/things/{thing}/shadow/`.
pub fn parse_shadow_topic(topic: &str) -> Option<ShadowTopic> {
    let rest = topic.strip_prefix(PREFIX)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();

    if parts.len() < 3 || parts.len() > 4 || parts[1] != "shadow" || parts[0].is_empty() {
        return None;
    }

    Some(ShadowTopic {
        thing: parts[0].to_string(),
        operation: parts[2].to_string(),
        response: parts.get(3).map(|s| s.to_string()),
    })
}
