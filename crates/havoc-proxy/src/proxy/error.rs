//! Classification of upstream transport failures.
//!
//! Every failed upstream call becomes a 502 with a human-readable `message`
//! and a machine-useful `details` string. Classification walks the error
//! source chain looking for the underlying I/O cause; what the chain does
//! not expose as a typed error is matched on its rendered text.

use thiserror::Error;

/// Broad cause of an upstream failure. The display string is the
/// user-facing `message` of the 502 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UpstreamErrorKind {
    #[error("Connection refused by upstream server")]
    Refused,
    #[error("DNS resolution failed")]
    Dns,
    #[error("Upstream request timed out")]
    Timeout,
    #[error("Connection reset by upstream server")]
    Reset,
    #[error("SSL/TLS certificate error")]
    Tls,
    #[error("Failed to reach upstream server")]
    Other,
}

impl UpstreamErrorKind {
    /// Short code used in the `upstream:error:<code>` action tag.
    pub fn code(self) -> &'static str {
        match self {
            UpstreamErrorKind::Refused => "refused",
            UpstreamErrorKind::Dns => "dns",
            UpstreamErrorKind::Timeout => "timeout",
            UpstreamErrorKind::Reset => "reset",
            UpstreamErrorKind::Tls => "tls",
            UpstreamErrorKind::Other => "unknown",
        }
    }
}

/// A classified upstream failure, ready to render as a 502 body.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub kind: UpstreamErrorKind,
    pub message: String,
    pub details: String,
}

/// Classify a transport error against the host we were calling.
pub fn classify_upstream_error(
    err: &(dyn std::error::Error + 'static),
    host: &str,
) -> ClassifiedError {
    let mut io_kind: Option<std::io::ErrorKind> = None;
    let mut chain_text = String::new();

    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = cause {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            io_kind = Some(io.kind());
        }
        if !chain_text.is_empty() {
            chain_text.push_str(": ");
        }
        chain_text.push_str(&current.to_string());
        cause = current.source();
    }
    let lower = chain_text.to_ascii_lowercase();

    let kind = match io_kind {
        Some(std::io::ErrorKind::ConnectionRefused) => UpstreamErrorKind::Refused,
        Some(std::io::ErrorKind::ConnectionReset) | Some(std::io::ErrorKind::BrokenPipe) => {
            UpstreamErrorKind::Reset
        }
        Some(std::io::ErrorKind::TimedOut) => UpstreamErrorKind::Timeout,
        _ => classify_by_text(&lower),
    };

    let details = match kind {
        UpstreamErrorKind::Refused => format!("{host} is not accepting connections"),
        UpstreamErrorKind::Dns => format!("Could not resolve hostname: {host}"),
        UpstreamErrorKind::Timeout => format!("No response from {host}"),
        UpstreamErrorKind::Reset | UpstreamErrorKind::Tls | UpstreamErrorKind::Other => chain_text,
    };

    ClassifiedError {
        kind,
        message: kind.to_string(),
        details,
    }
}

fn classify_by_text(lower: &str) -> UpstreamErrorKind {
    if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
    {
        UpstreamErrorKind::Dns
    } else if lower.contains("certificate") || lower.contains("handshakefailure") {
        UpstreamErrorKind::Tls
    } else if lower.contains("connection refused") {
        UpstreamErrorKind::Refused
    } else if lower.contains("timed out") {
        UpstreamErrorKind::Timeout
    } else if lower.contains("connection reset") || lower.contains("broken pipe") {
        UpstreamErrorKind::Reset
    } else {
        UpstreamErrorKind::Other
    }
}
