//! The management API: config, rules, logs, health, and metrics.
//!
//! The engine consumes this surface; the browser editor and the scenario
//! library are external clients of it.

pub mod handlers;
pub mod router;
pub mod types;

pub use router::route_request;
