//! The proxy forwarder: request ingress, the chaos gate, the upstream call,
//! post-upstream effects, and response egress.
//!
//! Every outcome on this path appends a log entry to the engine, which
//! broadcasts it to WebSocket subscribers. No error escapes a handler: each
//! failure becomes a fully-formed HTTP response, except the deliberate
//! timeout hang, which parks the handler forever and leaves socket teardown
//! to the connection task (see `server`).

use super::client::HttpClient;
use super::error::classify_upstream_error;
use super::headers::{filter_request_headers, snapshot_headers, strip_response_headers};
use crate::engine::logs::{details_from_actions, LogEntry, LogStatus};
use crate::engine::rules::Rule;
use crate::engine::Engine;
use crate::metrics;
use crate::pipeline::{self, ImmediateResponse, PreDecision};
use chrono::{SecondsFormat, Utc};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode, Uri};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Ingress body buffer cap. Bodies beyond this get a 413 without ever
/// touching upstream.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Handle one request on the proxy surface (`/proxy/*`).
pub async fn handle_proxy(
    engine: &Arc<Engine>,
    client: &HttpClient,
    req: Request<Incoming>,
    hang_tx: &mpsc::Sender<u64>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let inbound_headers = req.headers().clone();

    let target_path = proxy_suffix(uri.path());
    let raw_query = uri.query().map(|q| q.to_string());
    let logged_path = match &raw_query {
        Some(q) => format!("{target_path}?{q}"),
        None => target_path.clone(),
    };

    let log = RequestLog {
        engine: engine.as_ref(),
        method: method.to_string(),
        path: logged_path,
        headers: snapshot_headers(&inbound_headers),
        started,
    };

    debug!("Proxy request: {} {}", method, target_path);

    // Stream the body into a buffer; content is opaque to the proxy.
    let body_bytes = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            let (status, message) = if err.is::<http_body_util::LengthLimitError>() {
                (413, "Request body too large")
            } else {
                (400, "Failed to read request body")
            };
            let response = json_response(
                status,
                serde_json::json!({"error": true, "message": message}),
                &[],
            );
            log.record(LogStatus::Code(status), log.elapsed_ms(), Vec::new(), None, None);
            return response;
        }
    };

    // Proxying is meaningless without a target.
    let config = engine.config();
    if config.target_url.is_empty() {
        let response = json_response(
            503,
            serde_json::json!({
                "error": true,
                "message": "No target URL configured",
                "details": "Set a target URL via the management interface before using the proxy.",
            }),
            &[],
        );
        log.record(LogStatus::Code(503), log.elapsed_ms(), Vec::new(), None, None);
        return response;
    }

    // The chaos gate. The matched rule rides along to the post stage;
    // re-matching would re-roll drop sampling and token consumption.
    let (mut actions, matched_rule) = if config.enabled {
        let pre = pipeline::evaluate_pre(engine, &target_path, method.as_str());
        match pre.decision {
            PreDecision::Respond(immediate) => {
                let status = immediate.status;
                let response = immediate_response(&immediate);
                log.record(
                    LogStatus::Code(status),
                    log.elapsed_ms(),
                    pre.actions,
                    pre.rule.as_ref(),
                    None,
                );
                return response;
            }
            PreDecision::Hang { duration_ms } => {
                // Observers see the event at the moment of entry, not at
                // teardown.
                log.record(
                    LogStatus::timeout(),
                    duration_ms,
                    pre.actions,
                    pre.rule.as_ref(),
                    None,
                );
                let _ = hang_tx.send(duration_ms).await;
                // Park forever; the connection task owns the socket now and
                // will drop it when the timer fires. Nothing may be written.
                return std::future::pending().await;
            }
            PreDecision::Proceed => (pre.actions, pre.rule),
        }
    } else {
        (vec!["chaos:disabled".to_string()], None)
    };

    // Target URL construction.
    let target = match build_target_uri(&config.target_url, &target_path, raw_query.as_deref()) {
        Ok(uri) => uri,
        Err(reason) => {
            warn!("Invalid target URL '{}': {}", config.target_url, reason);
            let response = json_response(
                502,
                serde_json::json!({
                    "error": true,
                    "message": "Invalid target URL",
                    "details": reason,
                }),
                &[],
            );
            log.record(
                LogStatus::Code(502),
                log.elapsed_ms(),
                actions,
                matched_rule.as_ref(),
                None,
            );
            return response;
        }
    };
    let host = target
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_else(|| config.target_url.clone());

    // Upstream call.
    let mut builder = Request::builder().method(method.clone()).uri(target);
    if let Some(headers) = builder.headers_mut() {
        *headers = filter_request_headers(&inbound_headers);
    }
    let outbound_body =
        if method != Method::GET && method != Method::HEAD && !body_bytes.is_empty() {
            full_body(body_bytes)
        } else {
            full_body(Bytes::new())
        };
    let upstream_req = match builder.body(outbound_body) {
        Ok(r) => r,
        Err(err) => {
            let response = json_response(
                502,
                serde_json::json!({
                    "error": true,
                    "message": "Invalid target URL",
                    "details": err.to_string(),
                }),
                &[],
            );
            log.record(
                LogStatus::Code(502),
                log.elapsed_ms(),
                actions,
                matched_rule.as_ref(),
                None,
            );
            return response;
        }
    };

    actions.push("upstream:request".to_string());
    let upstream_response = match client.request(upstream_req).await {
        Ok(response) => response,
        Err(err) => {
            return upstream_failure(&log, &err, &host, actions, matched_rule.as_ref());
        }
    };
    actions.push(format!("upstream:{}", upstream_response.status().as_u16()));

    // Post-upstream effects, computed from the rule carried through.
    let effects = pipeline::evaluate_post(matched_rule.as_ref());
    if effects.delay_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(effects.delay_ms)).await;
        metrics::record_latency(
            matched_rule.as_ref().map(|r| r.id.as_str()).unwrap_or(""),
            effects.delay_ms,
        );
    }
    actions.extend(effects.actions);

    let (mut parts, upstream_body) = upstream_response.into_parts();
    strip_response_headers(&mut parts.headers);

    let upstream_is_json = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);

    let response = if effects.corrupt && upstream_is_json {
        // Corruption needs the whole body in hand.
        let collected = match upstream_body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                return upstream_failure(&log, &err, &host, actions, matched_rule.as_ref());
            }
        };
        let (mutated, action) = pipeline::corrupt::corrupt_json_body(&collected);
        actions.push(action);
        parts.headers.remove(CONTENT_LENGTH);
        if let Ok(value) = hyper::header::HeaderValue::from_str(&mutated.len().to_string()) {
            parts.headers.insert(CONTENT_LENGTH, value);
        }
        Response::from_parts(parts, full_body(Bytes::from(mutated)))
    } else {
        // No-chaos fast path: stream the body through without buffering.
        Response::from_parts(parts, BoxBody::new(upstream_body))
    };

    let status = response.status().as_u16();
    log.record(
        LogStatus::Code(status),
        log.elapsed_ms(),
        actions,
        matched_rule.as_ref(),
        None,
    );
    response
}

/// Per-request logging context. Recording appends to the engine (which
/// broadcasts) and feeds the Prometheus counters.
struct RequestLog<'a> {
    engine: &'a Engine,
    method: String,
    path: String,
    headers: HashMap<String, String>,
    started: Instant,
}

impl RequestLog<'_> {
    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn record(
        &self,
        status: LogStatus,
        response_time: u64,
        actions: Vec<String>,
        rule: Option<&Rule>,
        details_override: Option<String>,
    ) {
        let status_label = match &status {
            LogStatus::Code(code) => code.to_string(),
            LogStatus::Label(label) => label.clone(),
        };
        metrics::record_request(&self.method, &status_label);
        metrics::record_duration(&self.method, rule.is_some(), response_time as f64);
        if let Some(rule) = rule {
            metrics::record_chaos(rule.chaos.kind(), &rule.id);
        }

        let entry = LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            method: self.method.clone(),
            path: self.path.clone(),
            headers: self.headers.clone(),
            status_code: status,
            response_time,
            chaos_applied: rule.is_some(),
            chaos_type: rule.map(|r| r.chaos.kind().to_string()),
            chaos_rule_id: rule.map(|r| r.id.clone()),
            chaos_rule_name: rule.map(|r| r.name.clone()),
            chaos_details: details_override.or_else(|| details_from_actions(&actions)),
            actions_applied: actions,
        };
        self.engine.append_log(entry);
    }
}

/// Respond 502 for a classified transport failure.
fn upstream_failure(
    log: &RequestLog<'_>,
    err: &(dyn std::error::Error + 'static),
    host: &str,
    mut actions: Vec<String>,
    rule: Option<&Rule>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let classified = classify_upstream_error(err, host);
    warn!(
        "Upstream call failed ({}): {}",
        classified.kind.code(),
        classified.details
    );
    actions.push(format!("upstream:error:{}", classified.kind.code()));
    let response = json_response(
        502,
        serde_json::json!({
            "error": true,
            "message": classified.message,
            "details": classified.details,
        }),
        &[],
    );
    log.record(
        LogStatus::Code(502),
        log.elapsed_ms(),
        actions,
        rule,
        Some(format!("Proxy error: {}", classified.message)),
    );
    response
}

/// The path after the `/proxy` mount point; the empty suffix means `/`.
fn proxy_suffix(path: &str) -> String {
    let suffix = path.strip_prefix("/proxy").unwrap_or(path);
    if suffix.is_empty() {
        "/".to_string()
    } else {
        suffix.to_string()
    }
}

/// Resolve the request path against the target URL the way a relative URL
/// reference would: scheme and authority come from the target, the path
/// replaces the target's path, and the original raw query is carried over
/// verbatim (ordering and duplicate keys preserved).
fn build_target_uri(target_url: &str, path: &str, raw_query: Option<&str>) -> Result<Uri, String> {
    let base: Uri = target_url
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| e.to_string())?;
    let scheme = base
        .scheme_str()
        .ok_or_else(|| format!("target URL '{target_url}' has no scheme"))?;
    let authority = base
        .authority()
        .cloned()
        .ok_or_else(|| format!("target URL '{target_url}' has no host"))?;
    let path_and_query = match raw_query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query.as_str())
        .build()
        .map_err(|e| e.to_string())
}

fn full_body(bytes: impl Into<Bytes>) -> BoxBody<Bytes, hyper::Error> {
    BoxBody::new(Full::new(bytes.into()).map_err(|never: Infallible| match never {}))
}

/// Build a JSON response with the given status, body, and extra headers.
fn json_response(
    status: u16,
    body: serde_json::Value,
    extra_headers: &[(String, String)],
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json");
    for (name, value) in extra_headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(full_body(body.to_string()))
        .unwrap_or_else(|_| Response::new(full_body("{}")))
}

fn immediate_response(immediate: &ImmediateResponse) -> Response<BoxBody<Bytes, hyper::Error>> {
    let status =
        StatusCode::from_u16(immediate.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json");
    for (name, value) in &immediate.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(full_body(immediate.body.clone()))
        .unwrap_or_else(|_| Response::new(full_body("{}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_suffix() {
        assert_eq!(proxy_suffix("/proxy/api/users"), "/api/users");
        assert_eq!(proxy_suffix("/proxy"), "/");
        assert_eq!(proxy_suffix("/proxy/"), "/");
    }

    #[test]
    fn test_build_target_uri_joins_path_and_query() {
        let uri = build_target_uri("http://up:8080", "/a/b", Some("x=1&x=2&y")).unwrap();
        assert_eq!(uri.to_string(), "http://up:8080/a/b?x=1&x=2&y");
    }

    #[test]
    fn test_build_target_uri_replaces_base_path() {
        // Relative reference semantics: the target's own path is dropped.
        let uri = build_target_uri("http://up/base", "/x", None).unwrap();
        assert_eq!(uri.to_string(), "http://up/x");
    }

    #[test]
    fn test_build_target_uri_rejects_garbage() {
        assert!(build_target_uri("not a url", "/x", None).is_err());
        assert!(build_target_uri("up.example", "/x", None).is_err());
    }

    #[test]
    fn test_immediate_response_carries_extra_headers() {
        let response = immediate_response(&ImmediateResponse {
            status: 429,
            body: "{}".to_string(),
            headers: vec![("Retry-After".to_string(), "3".to_string())],
        });
        assert_eq!(response.status(), 429);
        assert_eq!(response.headers().get("retry-after").unwrap(), "3");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_immediate_response_invalid_status_falls_back() {
        let response = immediate_response(&ImmediateResponse {
            status: 42,
            body: "{}".to_string(),
            headers: Vec::new(),
        });
        assert_eq!(response.status(), 500);
    }
}
