//! Header hygiene for the forwarding path.

use hyper::header::{HeaderMap, HeaderValue};
use std::collections::HashMap;

/// Headers that must not travel through an intermediary (RFC 7230 §6.1),
/// plus `host` and `content-length`, which the client stack re-derives.
const HOP_BY_HOP: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Headers stripped from the upstream response before relaying it.
const RESPONSE_STRIP: [&str; 3] = ["transfer-encoding", "connection", "keep-alive"];

/// Build the outbound header map: hop-by-hop headers and every header named
/// by the inbound `Connection` token list are dropped; repeated names are
/// joined into one value with `", "`.
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut connection_named: Vec<String> = Vec::new();
    for value in headers.get_all("connection") {
        if let Ok(list) = value.to_str() {
            connection_named.extend(
                list.split(',')
                    .map(|token| token.trim().to_ascii_lowercase())
                    .filter(|token| !token.is_empty()),
            );
        }
    }

    let mut out = HeaderMap::new();
    for name in headers.keys() {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || connection_named.iter().any(|t| t == lower) {
            continue;
        }
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&joined) {
            out.insert(name.clone(), value);
        }
    }
    out
}

pub fn strip_response_headers(headers: &mut HeaderMap) {
    for name in RESPONSE_STRIP {
        headers.remove(name);
    }
}

/// Flatten a header map for the log snapshot; repeated names join with `", "`.
pub fn snapshot_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(name.as_str().to_string(), joined);
    }
    map
}
