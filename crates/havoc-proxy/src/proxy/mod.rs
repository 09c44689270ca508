//! The proxy forwarder and its supporting pieces.

pub mod client;
pub mod error;
pub mod handler;
pub mod headers;

pub use client::{create_http_client, HttpClient};
pub use handler::handle_proxy;
