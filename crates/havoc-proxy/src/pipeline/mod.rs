//! The chaos pipeline: pre-upstream decision and post-upstream effects.
//!
//! `evaluate_pre` matches the request against the rule set and decides
//! whether to answer immediately (forced errors, rate limiting), hold and
//! destroy the socket (timeout), or proceed to upstream. `evaluate_post`
//! computes the effects applied after the upstream call. The forwarder
//! carries the matched rule between the two; re-matching would re-roll the
//! non-idempotent stages (drop sampling, token consumption).

pub mod corrupt;

use crate::engine::bucket::Consume;
use crate::engine::rules::{ChaosSpec, Rule};
use crate::engine::Engine;
use rand::Rng;

/// Hard ceiling on how long a timeout rule may hold a socket.
pub const MAX_HANG_MS: u64 = 300_000;

/// A fully-formed response the forwarder writes without calling upstream.
#[derive(Debug, Clone)]
pub struct ImmediateResponse {
    pub status: u16,
    /// JSON body; the content type is always `application/json`.
    pub body: String,
    /// Extra headers, e.g. `Retry-After` on token-bucket blocks.
    pub headers: Vec<(String, String)>,
}

/// What the forwarder should do before (or instead of) calling upstream.
#[derive(Debug, Clone)]
pub enum PreDecision {
    /// Continue to upstream; any matched rule rides along for `evaluate_post`.
    Proceed,
    Respond(ImmediateResponse),
    /// Hold the TCP socket for `duration_ms`, then destroy it. No HTTP
    /// response is ever written on this path.
    Hang { duration_ms: u64 },
}

/// Result of the pre-upstream stage.
#[derive(Debug)]
pub struct PreEvaluation {
    pub actions: Vec<String>,
    pub rule: Option<Rule>,
    pub decision: PreDecision,
}

/// Effects the forwarder applies after the upstream response arrives.
#[derive(Debug, Default)]
pub struct PostEffects {
    pub delay_ms: u64,
    pub corrupt: bool,
    pub actions: Vec<String>,
}

/// Match the request and run the pre-upstream stages of the matched rule.
pub fn evaluate_pre(engine: &Engine, path: &str, method: &str) -> PreEvaluation {
    let rules = engine.list_rules();
    let Some(rule) = crate::matcher::find_matching_rule(&rules, path, method).cloned() else {
        return PreEvaluation {
            actions: vec!["match:no_rule".to_string()],
            rule: None,
            decision: PreDecision::Proceed,
        };
    };

    let mut actions = vec![format!("match:{}", rule.name)];
    let decision = match &rule.chaos {
        ChaosSpec::RateLimit { fail_rate } => {
            let sample: f64 = rand::thread_rng().gen_range(0.0..100.0);
            if sample < *fail_rate {
                actions.push(format!("drop_rate:triggered:{}%", format_rate(*fail_rate)));
                PreDecision::Respond(ImmediateResponse {
                    status: 429,
                    body: serde_json::json!({
                        "error": true,
                        "message": "Too Many Requests (drop rate triggered)",
                        "chaosMonkey": true,
                    })
                    .to_string(),
                    headers: Vec::new(),
                })
            } else {
                actions.push(format!("drop_rate:passed:{}%", format_rate(*fail_rate)));
                PreDecision::Proceed
            }
        }
        ChaosSpec::TokenBucket { rps, burst } => {
            let key = format!("{}:{}", method.to_ascii_uppercase(), rule.id);
            match engine.buckets().try_consume(&key, *rps, *burst) {
                Consume::Allowed => {
                    actions.push("token_bucket:passed".to_string());
                    PreDecision::Proceed
                }
                Consume::Blocked { retry_after_secs } => {
                    actions.push(format!("token_bucket:blocked(retry_after={retry_after_secs})"));
                    PreDecision::Respond(ImmediateResponse {
                        status: 429,
                        body: serde_json::json!({
                            "error": true,
                            "message": "Too Many Requests (rate limited)",
                            "retryAfter": retry_after_secs,
                            "chaosMonkey": true,
                        })
                        .to_string(),
                        headers: vec![("Retry-After".to_string(), retry_after_secs.to_string())],
                    })
                }
            }
        }
        ChaosSpec::Timeout {
            timeout_ms,
            jitter_ms,
        } => {
            let duration_ms = hang_duration(*timeout_ms, *jitter_ms).min(MAX_HANG_MS);
            actions.push(format!("timeout:triggered(ms={duration_ms})"));
            PreDecision::Hang { duration_ms }
        }
        ChaosSpec::Error { status, message } => {
            actions.push(format!("error:{status}"));
            PreDecision::Respond(ImmediateResponse {
                status: *status,
                body: serde_json::json!({
                    "error": true,
                    "message": message,
                    "chaosMonkey": true,
                })
                .to_string(),
                headers: Vec::new(),
            })
        }
        // Post-upstream chaos; nothing to decide yet.
        ChaosSpec::Latency { .. } | ChaosSpec::Corrupt => PreDecision::Proceed,
    };

    PreEvaluation {
        actions,
        rule: Some(rule),
        decision,
    }
}

/// Compute post-upstream effects for the rule matched pre-upstream.
pub fn evaluate_post(rule: Option<&Rule>) -> PostEffects {
    let mut effects = PostEffects::default();
    match rule.map(|r| &r.chaos) {
        Some(ChaosSpec::Latency {
            fixed_ms,
            min_ms,
            max_ms,
        }) => {
            let delay_ms = match fixed_ms {
                Some(ms) => *ms,
                None if min_ms < max_ms => rand::thread_rng().gen_range(*min_ms..=*max_ms),
                None => *min_ms,
            };
            effects.delay_ms = delay_ms;
            effects.actions.push(format!("latency:{delay_ms}ms"));
        }
        Some(ChaosSpec::Corrupt) => {
            // The corruption action is emitted by the corruption routine
            // itself; it depends on the actual body.
            effects.corrupt = true;
        }
        _ => {}
    }
    effects
}

fn hang_duration(timeout_ms: u64, jitter_ms: u64) -> u64 {
    let jitter = jitter_ms as i64;
    let offset = if jitter > 0 {
        rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        0
    };
    (timeout_ms as i64 + offset).max(0) as u64
}

fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 {
        format!("{}", rate as i64)
    } else {
        format!("{rate}")
    }
}
