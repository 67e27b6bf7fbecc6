//! Event naming and message helpers shared by the queue and its callers.

/// Suffix appended to an event name to form its in-flight list key.
pub const IN_FLIGHT_SUFFIX: &str = "/proc";

/// Longest message excerpt written to logs.
const PREVIEW_LIMIT: usize = 256;

/// Namespace an event suffix under a pipeline identifier (`<id>/<suffix>`).
pub fn event_name(namespace: &str, suffix: &str) -> String {
    format!("{namespace}/{suffix}")
}

/// List key holding delivered-but-unacknowledged messages for `event`.
pub fn in_flight_key(event: &str) -> String {
    format!("{event}{IN_FLIGHT_SUFFIX}")
}

/// Lossy UTF-8 rendering of a message body for log lines.
pub fn preview(message: &[u8]) -> String {
    let text = String::from_utf8_lossy(message);
    if text.chars().count() <= PREVIEW_LIMIT {
        return text.into_owned();
    }
    let mut cut: String = text.chars().take(PREVIEW_LIMIT).collect();
    cut.push('…');
    cut
}
