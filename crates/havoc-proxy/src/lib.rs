//! Havoc - an HTTP chaos proxy.
//!
//! Havoc sits between a client application and its upstream and injects
//! controlled failure modes on matching requests: latency, synthetic
//! errors, socket-level timeouts, JSON response corruption, probabilistic
//! drops, and token-bucket rate limiting. Rules, config, and the request
//! log live in memory for the process lifetime and are managed over a small
//! REST surface; every logged request is also pushed to WebSocket
//! subscribers in real time.

pub mod admin_api;
pub mod engine;
pub mod matcher;
pub mod metrics;
pub mod pipeline;
pub mod proxy;
pub mod server;
pub mod ws;
