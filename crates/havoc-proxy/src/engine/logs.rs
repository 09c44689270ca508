//! Request log entries and the action-tag audit trail.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status recorded on a log entry: a real HTTP status, or the literal
/// `"timeout"` tag for requests torn down by the timeout fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogStatus {
    Code(u16),
    Label(String),
}

impl LogStatus {
    pub fn timeout() -> Self {
        LogStatus::Label("timeout".to_string())
    }
}

/// One proxied request's audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    pub method: String,
    pub path: String,
    /// Inbound header snapshot; repeated names are joined with `", "`.
    pub headers: HashMap<String, String>,
    pub status_code: LogStatus,
    /// Total elapsed milliseconds, or the planned hang duration for timeouts.
    pub response_time: u64,
    pub chaos_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chaos_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chaos_rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chaos_rule_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chaos_details: Option<String>,
    pub actions_applied: Vec<String>,
}

/// Render the human-readable detail line: action tags joined with `" → "`,
/// excluding the `upstream:*` bookkeeping entries.
pub fn details_from_actions(actions: &[String]) -> Option<String> {
    let visible: Vec<&str> = actions
        .iter()
        .filter(|a| !a.starts_with("upstream:"))
        .map(String::as_str)
        .collect();
    if visible.is_empty() {
        None
    } else {
        Some(visible.join(" → "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_as_number_or_tag() {
        assert_eq!(serde_json::to_string(&LogStatus::Code(200)).unwrap(), "200");
        assert_eq!(
            serde_json::to_string(&LogStatus::timeout()).unwrap(),
            "\"timeout\""
        );
    }

    #[test]
    fn test_status_deserializes_both_shapes() {
        let code: LogStatus = serde_json::from_str("502").unwrap();
        assert_eq!(code, LogStatus::Code(502));
        let tag: LogStatus = serde_json::from_str("\"timeout\"").unwrap();
        assert_eq!(tag, LogStatus::timeout());
    }

    #[test]
    fn test_details_exclude_upstream_actions() {
        let actions = vec![
            "match:slow-down".to_string(),
            "upstream:request".to_string(),
            "upstream:200".to_string(),
            "latency:200ms".to_string(),
        ];
        assert_eq!(
            details_from_actions(&actions).unwrap(),
            "match:slow-down → latency:200ms"
        );
    }

    #[test]
    fn test_details_empty_when_only_upstream_actions() {
        let actions = vec!["upstream:request".to_string(), "upstream:200".to_string()];
        assert_eq!(details_from_actions(&actions), None);
    }
}
