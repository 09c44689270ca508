//! Per-rule token buckets with lazy refill.
//!
//! Buckets are keyed by `"<METHOD>:<ruleId>"` and created full. Every
//! consume refreshes `rps`/`burst` from the caller so live rule edits take
//! effect immediately. Each bucket's refill-and-consume is one critical
//! section; buckets for different keys proceed in parallel.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ceiling applied to Retry-After when rps is zero or pathologically small.
const MAX_RETRY_AFTER_SECS: u64 = 86_400;

/// Outcome of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consume {
    Allowed,
    Blocked { retry_after_secs: u64 },
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
    rps: f64,
    burst: f64,
}

/// Registry of all live buckets.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token from the bucket for `key`, creating it full on first
    /// sight. Returns how long the caller should wait when blocked.
    pub fn try_consume(&self, key: &str, rps: f64, burst: f64) -> Consume {
        self.try_consume_at(key, rps, burst, epoch_ms())
    }

    /// Deterministic variant driven by an explicit clock, used by tests.
    pub(crate) fn try_consume_at(&self, key: &str, rps: f64, burst: f64, now_ms: u64) -> Consume {
        let bucket = self.bucket(key, burst, now_ms);
        let mut b = bucket.lock();

        // Rules may be edited live; the arguments are authoritative.
        b.rps = rps;
        b.burst = burst;

        let elapsed_sec = now_ms.saturating_sub(b.last_refill_ms) as f64 / 1000.0;
        b.tokens = (b.tokens + elapsed_sec * rps).min(burst);
        b.last_refill_ms = now_ms;

        if b.tokens >= 1.0 {
            b.tokens -= 1.0;
            Consume::Allowed
        } else {
            let retry = ((1.0 - b.tokens) / rps).ceil();
            let retry_after_secs = if retry.is_finite() {
                (retry as u64).clamp(1, MAX_RETRY_AFTER_SECS)
            } else {
                MAX_RETRY_AFTER_SECS
            };
            Consume::Blocked { retry_after_secs }
        }
    }

    fn bucket(&self, key: &str, burst: f64, now_ms: u64) -> Arc<Mutex<Bucket>> {
        if let Some(existing) = self.buckets.read().get(key) {
            return Arc::clone(existing);
        }
        let mut map = self.buckets.write();
        Arc::clone(map.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket {
                tokens: burst,
                last_refill_ms: now_ms,
                rps: 0.0,
                burst,
            }))
        }))
    }

    /// Drop every bucket. Test hook.
    pub fn clear_all(&self) {
        self.buckets.write().clear();
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
