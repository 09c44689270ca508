//! Chaos rule model and its flat wire representation.
//!
//! Internally a rule carries a tagged [`ChaosSpec`] variant so each failure
//! mode only owns the parameters it actually uses. The management surface
//! speaks the flat camelCase shape ([`RuleSpec`]); conversion happens at the
//! boundary in both directions.

use crate::matcher::PathMatcher;
use serde::{Deserialize, Serialize};

const DEFAULT_LATENCY_MIN_MS: u64 = 100;
const DEFAULT_LATENCY_MAX_MS: u64 = 1000;
const DEFAULT_ERROR_STATUS: u16 = 500;
const DEFAULT_ERROR_MESSAGE: &str = "Internal Server Error";
const DEFAULT_TIMEOUT_MS: u64 = 8000;
const DEFAULT_FAIL_RATE: f64 = 50.0;
const DEFAULT_RPS: f64 = 10.0;

/// One failure mode with its variant-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ChaosSpec {
    Latency {
        /// Fixed delay; when absent the delay is drawn uniformly from [min, max].
        fixed_ms: Option<u64>,
        min_ms: u64,
        max_ms: u64,
    },
    Error {
        status: u16,
        message: String,
    },
    Timeout {
        timeout_ms: u64,
        jitter_ms: u64,
    },
    Corrupt,
    RateLimit {
        /// Independent per-request drop probability, 0-100.
        fail_rate: f64,
    },
    TokenBucket {
        rps: f64,
        burst: f64,
    },
}

impl ChaosSpec {
    /// The wire tag for this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ChaosSpec::Latency { .. } => "latency",
            ChaosSpec::Error { .. } => "error",
            ChaosSpec::Timeout { .. } => "timeout",
            ChaosSpec::Corrupt => "corrupt",
            ChaosSpec::RateLimit { .. } => "rate-limit",
            ChaosSpec::TokenBucket { .. } => "token-bucket",
        }
    }
}

/// A chaos rule: a path/method filter plus one failure mode.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Regex source; patterns that fail to compile match by substring instead.
    pub path_pattern: String,
    /// Uppercased method filter. Contains `"*"` alone when any method is admitted.
    pub methods: Vec<String>,
    pub chaos: ChaosSpec,
    matcher: PathMatcher,
}

impl Rule {
    /// Validate and convert the flat wire shape into a rule, compiling the
    /// path pattern and filling variant defaults.
    pub fn from_spec(spec: RuleSpec) -> Result<Self, RuleError> {
        let name = spec
            .name
            .filter(|s| !s.is_empty())
            .ok_or(RuleError::MissingField("name"))?;
        let path_pattern = spec
            .path_pattern
            .filter(|s| !s.is_empty())
            .ok_or(RuleError::MissingField("pathPattern"))?;
        let kind = spec
            .chaos_type
            .filter(|s| !s.is_empty())
            .ok_or(RuleError::MissingField("chaosType"))?;

        let chaos = match kind.as_str() {
            "latency" => ChaosSpec::Latency {
                fixed_ms: spec.latency_ms,
                min_ms: spec.latency_min_ms.unwrap_or(DEFAULT_LATENCY_MIN_MS),
                max_ms: spec.latency_max_ms.unwrap_or(DEFAULT_LATENCY_MAX_MS),
            },
            "error" => ChaosSpec::Error {
                status: spec
                    .error_status_code
                    .filter(|s| (100..=599).contains(s))
                    .unwrap_or(DEFAULT_ERROR_STATUS),
                message: spec
                    .error_message
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            },
            "timeout" => ChaosSpec::Timeout {
                timeout_ms: spec.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                jitter_ms: spec.jitter_ms.unwrap_or(0),
            },
            "corrupt" => ChaosSpec::Corrupt,
            "rate-limit" => ChaosSpec::RateLimit {
                fail_rate: spec.fail_rate.unwrap_or(DEFAULT_FAIL_RATE).clamp(0.0, 100.0),
            },
            "token-bucket" => {
                let rps = spec.rps.unwrap_or(DEFAULT_RPS).max(0.0);
                ChaosSpec::TokenBucket {
                    rps,
                    burst: spec.burst.unwrap_or(rps).max(0.0),
                }
            }
            other => return Err(RuleError::UnknownChaosType(other.to_string())),
        };

        // Normalize methods: uppercase, and a wildcard absorbs everything else.
        let mut methods: Vec<String> = spec
            .methods
            .unwrap_or_default()
            .into_iter()
            .filter(|m| !m.is_empty())
            .map(|m| m.to_ascii_uppercase())
            .collect();
        if methods.is_empty() || methods.iter().any(|m| m == "*") {
            methods = vec!["*".to_string()];
        }

        let id = spec
            .id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let matcher = PathMatcher::compile(&path_pattern);

        Ok(Rule {
            id,
            name,
            enabled: spec.enabled.unwrap_or(true),
            path_pattern,
            methods,
            chaos,
            matcher,
        })
    }

    /// Render back to the flat wire shape, emitting only the parameters that
    /// belong to this rule's variant.
    pub fn to_spec(&self) -> RuleSpec {
        let mut spec = RuleSpec {
            id: Some(self.id.clone()),
            name: Some(self.name.clone()),
            enabled: Some(self.enabled),
            path_pattern: Some(self.path_pattern.clone()),
            methods: Some(self.methods.clone()),
            chaos_type: Some(self.chaos.kind().to_string()),
            ..RuleSpec::default()
        };
        match &self.chaos {
            ChaosSpec::Latency {
                fixed_ms,
                min_ms,
                max_ms,
            } => {
                spec.latency_ms = *fixed_ms;
                spec.latency_min_ms = Some(*min_ms);
                spec.latency_max_ms = Some(*max_ms);
            }
            ChaosSpec::Error { status, message } => {
                spec.error_status_code = Some(*status);
                spec.error_message = Some(message.clone());
            }
            ChaosSpec::Timeout {
                timeout_ms,
                jitter_ms,
            } => {
                spec.timeout_ms = Some(*timeout_ms);
                spec.jitter_ms = Some(*jitter_ms);
            }
            ChaosSpec::Corrupt => {}
            ChaosSpec::RateLimit { fail_rate } => {
                spec.fail_rate = Some(*fail_rate);
            }
            ChaosSpec::TokenBucket { rps, burst } => {
                spec.rps = Some(*rps);
                spec.burst = Some(*burst);
            }
        }
        spec
    }

    /// Whether the method filter admits the given method (case-insensitive).
    pub fn admits_method(&self, method: &str) -> bool {
        self.methods
            .iter()
            .any(|m| m == "*" || m.eq_ignore_ascii_case(method))
    }

    /// Whether the compiled path pattern matches the given path.
    pub fn matches_path(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

/// Flat camelCase rule shape used on the management surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chaos_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_min_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_max_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst: Option<f64>,
}

/// Rule validation and store errors surfaced as 400/409-style responses.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unknown chaosType: {0}")]
    UnknownChaosType(String),
    #[error("a rule with id {0} already exists")]
    DuplicateId(String),
    #[error("rule patch must be a JSON object")]
    PatchNotObject,
    #[error("invalid rule payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_spec(kind: &str) -> RuleSpec {
        RuleSpec {
            name: Some("test".to_string()),
            path_pattern: Some("/api/.*".to_string()),
            chaos_type: Some(kind.to_string()),
            ..RuleSpec::default()
        }
    }

    #[test]
    fn test_missing_required_fields() {
        let spec = RuleSpec {
            name: Some("x".to_string()),
            ..RuleSpec::default()
        };
        assert!(matches!(
            Rule::from_spec(spec),
            Err(RuleError::MissingField("pathPattern"))
        ));

        let spec = RuleSpec {
            name: Some("x".to_string()),
            path_pattern: Some("/".to_string()),
            ..RuleSpec::default()
        };
        assert!(matches!(
            Rule::from_spec(spec),
            Err(RuleError::MissingField("chaosType"))
        ));
    }

    #[test]
    fn test_unknown_chaos_type() {
        let rule = Rule::from_spec(minimal_spec("explode"));
        assert!(matches!(rule, Err(RuleError::UnknownChaosType(t)) if t == "explode"));
    }

    #[test]
    fn test_latency_defaults() {
        let rule = Rule::from_spec(minimal_spec("latency")).unwrap();
        match rule.chaos {
            ChaosSpec::Latency {
                fixed_ms,
                min_ms,
                max_ms,
            } => {
                assert_eq!(fixed_ms, None);
                assert_eq!(min_ms, 100);
                assert_eq!(max_ms, 1000);
            }
            other => panic!("expected latency, got {other:?}"),
        }
    }

    #[test]
    fn test_error_defaults() {
        let rule = Rule::from_spec(minimal_spec("error")).unwrap();
        assert_eq!(
            rule.chaos,
            ChaosSpec::Error {
                status: 500,
                message: "Internal Server Error".to_string()
            }
        );
    }

    #[test]
    fn test_error_status_out_of_range_falls_back() {
        let mut spec = minimal_spec("error");
        spec.error_status_code = Some(42);
        let rule = Rule::from_spec(spec).unwrap();
        assert!(matches!(rule.chaos, ChaosSpec::Error { status: 500, .. }));
    }

    #[test]
    fn test_timeout_defaults() {
        let rule = Rule::from_spec(minimal_spec("timeout")).unwrap();
        assert_eq!(
            rule.chaos,
            ChaosSpec::Timeout {
                timeout_ms: 8000,
                jitter_ms: 0
            }
        );
    }

    #[test]
    fn test_token_bucket_burst_defaults_to_rps() {
        let mut spec = minimal_spec("token-bucket");
        spec.rps = Some(4.0);
        let rule = Rule::from_spec(spec).unwrap();
        assert_eq!(
            rule.chaos,
            ChaosSpec::TokenBucket {
                rps: 4.0,
                burst: 4.0
            }
        );
    }

    #[test]
    fn test_fail_rate_clamped() {
        let mut spec = minimal_spec("rate-limit");
        spec.fail_rate = Some(250.0);
        let rule = Rule::from_spec(spec).unwrap();
        assert_eq!(rule.chaos, ChaosSpec::RateLimit { fail_rate: 100.0 });
    }

    #[test]
    fn test_methods_default_to_wildcard() {
        let rule = Rule::from_spec(minimal_spec("corrupt")).unwrap();
        assert_eq!(rule.methods, vec!["*".to_string()]);
        assert!(rule.admits_method("GET"));
        assert!(rule.admits_method("BREW"));
    }

    #[test]
    fn test_wildcard_absorbs_other_methods() {
        let mut spec = minimal_spec("corrupt");
        spec.methods = Some(vec!["get".to_string(), "*".to_string(), "POST".to_string()]);
        let rule = Rule::from_spec(spec).unwrap();
        assert_eq!(rule.methods, vec!["*".to_string()]);
    }

    #[test]
    fn test_method_admission_is_case_insensitive() {
        let mut spec = minimal_spec("corrupt");
        spec.methods = Some(vec!["post".to_string()]);
        let rule = Rule::from_spec(spec).unwrap();
        assert!(rule.admits_method("POST"));
        assert!(rule.admits_method("post"));
        assert!(!rule.admits_method("GET"));
    }

    #[test]
    fn test_id_assigned_when_absent() {
        let a = Rule::from_spec(minimal_spec("corrupt")).unwrap();
        let b = Rule::from_spec(minimal_spec("corrupt")).unwrap();
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_spec_round_trip_preserves_rule() {
        let mut spec = minimal_spec("latency");
        spec.id = Some("r1".to_string());
        spec.latency_ms = Some(250);
        spec.methods = Some(vec!["GET".to_string(), "POST".to_string()]);
        let rule = Rule::from_spec(spec).unwrap();
        let again = Rule::from_spec(rule.to_spec()).unwrap();
        assert_eq!(again.id, rule.id);
        assert_eq!(again.name, rule.name);
        assert_eq!(again.methods, rule.methods);
        assert_eq!(again.chaos, rule.chaos);
    }

    #[test]
    fn test_to_spec_only_emits_variant_fields() {
        let rule = Rule::from_spec(minimal_spec("error")).unwrap();
        let spec = rule.to_spec();
        assert!(spec.error_status_code.is_some());
        assert!(spec.latency_ms.is_none());
        assert!(spec.rps.is_none());
        assert!(spec.timeout_ms.is_none());
    }
}
