//! Route dispatch for the management API.

use super::handlers;
use super::types::{preflight, with_cors};
use crate::engine::Engine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::sync::Arc;
use tracing::debug;

/// Main management request router.
pub async fn route_request(req: Request<Incoming>, engine: Arc<Engine>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|s| s.to_string());

    debug!("Management API: {} {}", method, path);

    let response = route_by_path(&method, &path, query.as_deref(), req, &engine).await;
    with_cors(response)
}

async fn route_by_path(
    method: &Method,
    path: &str,
    query: Option<&str>,
    req: Request<Incoming>,
    engine: &Arc<Engine>,
) -> Response<Full<Bytes>> {
    if *method == Method::OPTIONS {
        return preflight();
    }

    match (method, path) {
        (&Method::GET, "/health") => return handlers::handle_health(),
        (&Method::GET, "/metrics") => return handlers::handle_metrics(),
        (&Method::GET, "/config") => return handlers::handle_get_config(engine),
        (&Method::PUT, "/config") => return handlers::handle_update_config(req, engine).await,
        (&Method::GET, "/rules") => return handlers::handle_list_rules(engine),
        (&Method::POST, "/rules") => return handlers::handle_create_rule(req, engine).await,
        (&Method::GET, "/logs") => return handlers::handle_read_logs(engine, query),
        (&Method::DELETE, "/logs") => return handlers::handle_clear_logs(engine),
        _ => {}
    }

    // /rules/:id
    if let Some(id) = path.strip_prefix("/rules/").filter(|id| !id.is_empty()) {
        return match *method {
            Method::GET => handlers::handle_get_rule(engine, id),
            Method::PUT => handlers::handle_update_rule(req, engine, id).await,
            Method::DELETE => handlers::handle_delete_rule(engine, id),
            _ => handlers::handle_unknown(),
        };
    }

    handlers::handle_unknown()
}
