//! The engine: process-wide config, rule collection, bounded log ring, and
//! the log broadcast the WebSocket surface feeds from.
//!
//! All state lives behind `parking_lot` locks and is handed out as clones,
//! so callers never hold references into the store; no lock is ever held
//! across an await point. Everything here dies with the process.

use super::bucket::BucketRegistry;
use super::logs::LogEntry;
use super::rules::{Rule, RuleError, RuleSpec};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum retained log entries; the oldest entry is evicted past this.
pub const LOG_CAPACITY: usize = 1000;

/// Broadcast buffer per subscriber; laggards drop oldest entries rather than
/// blocking producers.
const BROADCAST_CAPACITY: usize = 256;

/// Proxy-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Upstream base URL; empty forbids proxying entirely.
    pub target_url: String,
    /// When false the chaos pipeline is bypassed and requests pass through.
    pub enabled: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            target_url: String::new(),
            enabled: true,
        }
    }
}

/// Partial config update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub target_url: Option<String>,
    pub enabled: Option<bool>,
}

/// Shared engine state injected into the forwarder and the management API.
pub struct Engine {
    config: RwLock<ProxyConfig>,
    rules: RwLock<Vec<Rule>>,
    logs: RwLock<VecDeque<LogEntry>>,
    log_tx: broadcast::Sender<LogEntry>,
    buckets: BucketRegistry,
}

impl Engine {
    pub fn new(initial: ProxyConfig) -> Self {
        let (log_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            config: RwLock::new(initial),
            rules: RwLock::new(Vec::new()),
            logs: RwLock::new(VecDeque::with_capacity(LOG_CAPACITY)),
            log_tx,
            buckets: BucketRegistry::new(),
        }
    }

    // ===== Config =====

    pub fn config(&self) -> ProxyConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, patch: ConfigPatch) -> ProxyConfig {
        let mut config = self.config.write();
        if let Some(target_url) = patch.target_url {
            config.target_url = target_url;
        }
        if let Some(enabled) = patch.enabled {
            config.enabled = enabled;
        }
        config.clone()
    }

    // ===== Rules =====

    /// Rules in insertion order, which is also the evaluation order.
    pub fn list_rules(&self) -> Vec<Rule> {
        self.rules.read().clone()
    }

    pub fn get_rule(&self, id: &str) -> Option<Rule> {
        self.rules.read().iter().find(|r| r.id == id).cloned()
    }

    pub fn create_rule(&self, spec: RuleSpec) -> Result<Rule, RuleError> {
        let rule = Rule::from_spec(spec)?;
        let mut rules = self.rules.write();
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(RuleError::DuplicateId(rule.id.clone()));
        }
        debug!("Created rule {} ({})", rule.id, rule.chaos.kind());
        rules.push(rule.clone());
        Ok(rule)
    }

    /// Merge a flat JSON patch into the stored rule. The id is immutable;
    /// whatever the patch says, the rule keeps the id it was created with.
    /// Returns `None` when no rule has that id.
    pub fn update_rule(&self, id: &str, patch: Value) -> Result<Option<Rule>, RuleError> {
        let Value::Object(patch) = patch else {
            return Err(RuleError::PatchNotObject);
        };
        let mut rules = self.rules.write();
        let Some(slot) = rules.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        let mut merged = serde_json::to_value(slot.to_spec())?;
        if let Value::Object(base) = &mut merged {
            for (key, value) in patch {
                base.insert(key, value);
            }
        }
        let mut spec: RuleSpec = serde_json::from_value(merged)?;
        spec.id = Some(id.to_string());
        let updated = Rule::from_spec(spec)?;
        *slot = updated.clone();
        Ok(Some(updated))
    }

    pub fn delete_rule(&self, id: &str) -> Option<Rule> {
        let mut rules = self.rules.write();
        let index = rules.iter().position(|r| r.id == id)?;
        Some(rules.remove(index))
    }

    // ===== Logs =====

    pub fn append_log(&self, entry: LogEntry) {
        {
            let mut logs = self.logs.write();
            logs.push_back(entry.clone());
            while logs.len() > LOG_CAPACITY {
                logs.pop_front();
            }
        }
        // No receivers is fine; the send result only says whether anyone listened.
        let _ = self.log_tx.send(entry);
    }

    /// Newest-first, up to `limit` entries.
    pub fn read_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let logs = self.logs.read();
        let take = limit.unwrap_or(logs.len()).min(logs.len());
        logs.iter().rev().take(take).cloned().collect()
    }

    pub fn clear_logs(&self) {
        self.logs.write().clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.log_tx.subscribe()
    }

    // ===== Buckets =====

    pub fn buckets(&self) -> &BucketRegistry {
        &self.buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::logs::LogStatus;
    use std::collections::HashMap;

    fn engine() -> Engine {
        Engine::new(ProxyConfig::default())
    }

    fn spec(id: &str, name: &str) -> RuleSpec {
        RuleSpec {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            path_pattern: Some(".*".to_string()),
            chaos_type: Some("latency".to_string()),
            latency_ms: Some(100),
            ..RuleSpec::default()
        }
    }

    fn log(id: &str) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            method: "GET".to_string(),
            path: "/x".to_string(),
            headers: HashMap::new(),
            status_code: LogStatus::Code(200),
            response_time: 1,
            chaos_applied: false,
            chaos_type: None,
            chaos_rule_id: None,
            chaos_rule_name: None,
            chaos_details: None,
            actions_applied: Vec::new(),
        }
    }

    #[test]
    fn test_config_patch_merges_fields() {
        let engine = engine();
        engine.update_config(ConfigPatch {
            target_url: Some("http://up".to_string()),
            enabled: None,
        });
        let config = engine.config();
        assert_eq!(config.target_url, "http://up");
        assert!(config.enabled);

        engine.update_config(ConfigPatch {
            target_url: None,
            enabled: Some(false),
        });
        let config = engine.config();
        assert_eq!(config.target_url, "http://up");
        assert!(!config.enabled);
    }

    #[test]
    fn test_empty_config_patch_is_noop() {
        let engine = engine();
        engine.update_config(ConfigPatch {
            target_url: Some("http://up".to_string()),
            enabled: Some(false),
        });
        let before = engine.config();
        engine.update_config(ConfigPatch::default());
        let after = engine.config();
        assert_eq!(before.target_url, after.target_url);
        assert_eq!(before.enabled, after.enabled);
    }

    #[test]
    fn test_rules_keep_insertion_order() {
        let engine = engine();
        engine.create_rule(spec("b", "second")).unwrap();
        engine.create_rule(spec("a", "first")).unwrap();
        engine.create_rule(spec("c", "third")).unwrap();
        let ids: Vec<String> = engine.list_rules().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let engine = engine();
        engine.create_rule(spec("a", "one")).unwrap();
        assert!(matches!(
            engine.create_rule(spec("a", "two")),
            Err(RuleError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_update_merges_partial_patch() {
        let engine = engine();
        engine.create_rule(spec("a", "before")).unwrap();
        let updated = engine
            .update_rule("a", serde_json::json!({"name": "after"}))
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "after");
        // Untouched fields survive the merge.
        assert_eq!(updated.path_pattern, ".*");
        assert_eq!(updated.chaos.kind(), "latency");
    }

    #[test]
    fn test_update_with_own_spec_is_noop() {
        let engine = engine();
        let rule = engine.create_rule(spec("a", "same")).unwrap();
        let patch = serde_json::to_value(rule.to_spec()).unwrap();
        let updated = engine.update_rule("a", patch).unwrap().unwrap();
        assert_eq!(updated.id, rule.id);
        assert_eq!(updated.name, rule.name);
        assert_eq!(updated.methods, rule.methods);
        assert_eq!(updated.chaos, rule.chaos);
    }

    #[test]
    fn test_update_cannot_change_id() {
        let engine = engine();
        engine.create_rule(spec("a", "x")).unwrap();
        let updated = engine
            .update_rule("a", serde_json::json!({"id": "hijacked"}))
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, "a");
        assert!(engine.get_rule("hijacked").is_none());
    }

    #[test]
    fn test_update_unknown_rule_returns_none() {
        let engine = engine();
        assert!(engine
            .update_rule("missing", serde_json::json!({}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_rejects_non_object_patch() {
        let engine = engine();
        engine.create_rule(spec("a", "x")).unwrap();
        assert!(matches!(
            engine.update_rule("a", serde_json::json!([1, 2])),
            Err(RuleError::PatchNotObject)
        ));
    }

    #[test]
    fn test_delete_rule() {
        let engine = engine();
        engine.create_rule(spec("a", "x")).unwrap();
        assert_eq!(engine.delete_rule("a").map(|r| r.id), Some("a".to_string()));
        assert!(engine.delete_rule("a").is_none());
        assert!(engine.get_rule("a").is_none());
    }

    #[test]
    fn test_returned_rules_are_copies() {
        let engine = engine();
        engine.create_rule(spec("a", "original")).unwrap();
        let mut copy = engine.get_rule("a").unwrap();
        copy.name = "mutated".to_string();
        assert_eq!(engine.get_rule("a").unwrap().name, "original");
    }

    #[test]
    fn test_log_ring_evicts_oldest() {
        let engine = engine();
        for i in 0..(LOG_CAPACITY + 25) {
            engine.append_log(log(&i.to_string()));
        }
        let logs = engine.read_logs(None);
        assert_eq!(logs.len(), LOG_CAPACITY);
        // Newest-first: the very last append comes back first.
        assert_eq!(logs[0].id, (LOG_CAPACITY + 24).to_string());
        // The first 25 entries were evicted.
        assert_eq!(logs[LOG_CAPACITY - 1].id, "25");
    }

    #[test]
    fn test_read_logs_limit() {
        let engine = engine();
        for i in 0..10 {
            engine.append_log(log(&i.to_string()));
        }
        let logs = engine.read_logs(Some(3));
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].id, "9");
        assert_eq!(logs[2].id, "7");
        // A limit beyond the ring size is harmless.
        assert_eq!(engine.read_logs(Some(500)).len(), 10);
    }

    #[test]
    fn test_clear_logs() {
        let engine = engine();
        engine.append_log(log("a"));
        engine.clear_logs();
        assert!(engine.read_logs(None).is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_receive_appends_in_order() {
        let engine = engine();
        let mut rx = engine.subscribe();
        engine.append_log(log("first"));
        engine.append_log(log("second"));
        assert_eq!(rx.recv().await.unwrap().id, "first");
        assert_eq!(rx.recv().await.unwrap().id, "second");
    }
}
