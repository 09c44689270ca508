//! Management API handlers: config, rules, logs, health, metrics.

use super::types::{collect_body, error_response, not_found, ok_response};
use crate::engine::rules::{RuleError, RuleSpec};
use crate::engine::{ConfigPatch, Engine};
use crate::metrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;

/// GET /health
pub fn handle_health() -> Response<Full<Bytes>> {
    ok_response(
        StatusCode::OK,
        &serde_json::json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}),
    )
}

/// GET /metrics - Prometheus exposition, not enveloped.
pub fn handle_metrics() -> Response<Full<Bytes>> {
    super::types::build_response_with_headers(
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics::collect_metrics(),
    )
}

/// GET /config
pub fn handle_get_config(engine: &Arc<Engine>) -> Response<Full<Bytes>> {
    ok_response(StatusCode::OK, &engine.config())
}

/// PUT /config - merge a partial patch, return the new config.
pub async fn handle_update_config(
    req: Request<Incoming>,
    engine: &Arc<Engine>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(bytes) => bytes,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };
    let patch: ConfigPatch = match serde_json::from_slice(&body) {
        Ok(patch) => patch,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid config patch: {err}"))
        }
    };
    ok_response(StatusCode::OK, &engine.update_config(patch))
}

/// GET /rules
pub fn handle_list_rules(engine: &Arc<Engine>) -> Response<Full<Bytes>> {
    let rules: Vec<RuleSpec> = engine.list_rules().iter().map(|r| r.to_spec()).collect();
    ok_response(StatusCode::OK, &rules)
}

/// GET /rules/:id
pub fn handle_get_rule(engine: &Arc<Engine>, id: &str) -> Response<Full<Bytes>> {
    match engine.get_rule(id) {
        Some(rule) => ok_response(StatusCode::OK, &rule.to_spec()),
        None => error_response(StatusCode::NOT_FOUND, "Rule not found"),
    }
}

/// POST /rules
pub async fn handle_create_rule(
    req: Request<Incoming>,
    engine: &Arc<Engine>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(bytes) => bytes,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };
    let spec: RuleSpec = match serde_json::from_slice(&body) {
        Ok(spec) => spec,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid rule: {err}"))
        }
    };
    match engine.create_rule(spec) {
        Ok(rule) => ok_response(StatusCode::CREATED, &rule.to_spec()),
        Err(err @ RuleError::DuplicateId(_)) => {
            error_response(StatusCode::CONFLICT, &err.to_string())
        }
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

/// PUT /rules/:id - merge a flat patch; the id is immutable.
pub async fn handle_update_rule(
    req: Request<Incoming>,
    engine: &Arc<Engine>,
    id: &str,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(bytes) => bytes,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };
    let patch: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid patch: {err}"))
        }
    };
    match engine.update_rule(id, patch) {
        Ok(Some(rule)) => ok_response(StatusCode::OK, &rule.to_spec()),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Rule not found"),
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

/// DELETE /rules/:id
pub fn handle_delete_rule(engine: &Arc<Engine>, id: &str) -> Response<Full<Bytes>> {
    match engine.delete_rule(id) {
        Some(rule) => ok_response(StatusCode::OK, &rule.to_spec()),
        None => error_response(StatusCode::NOT_FOUND, "Rule not found"),
    }
}

/// GET /logs?limit=N - newest first.
pub fn handle_read_logs(engine: &Arc<Engine>, query: Option<&str>) -> Response<Full<Bytes>> {
    let limit = query.and_then(parse_limit);
    ok_response(StatusCode::OK, &engine.read_logs(limit))
}

/// DELETE /logs
pub fn handle_clear_logs(engine: &Arc<Engine>) -> Response<Full<Bytes>> {
    engine.clear_logs();
    ok_response(StatusCode::OK, &serde_json::json!({"cleared": true}))
}

/// Fallback for unroutable management paths.
pub fn handle_unknown() -> Response<Full<Bytes>> {
    not_found()
}

fn parse_limit(query: &str) -> Option<usize> {
    query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key == "limit" {
            value.parse().ok()
        } else {
            None
        }
    })
}
