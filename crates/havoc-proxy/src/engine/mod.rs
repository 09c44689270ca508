//! Shared in-memory state: config, rules, logs, and token buckets.

pub mod bucket;
pub mod logs;
pub mod rules;
mod store;

pub use store::{ConfigPatch, Engine, ProxyConfig, LOG_CAPACITY};
