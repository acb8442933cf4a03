use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rama::http::{Body, Method, Request};

/// How a request left the proxy, for the completion log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    /// Relayed without the proxy adding a token.
    Relayed,
    /// The terminal hop carried a token obtained by the proxy.
    Authenticated,
    /// A 401 the proxy could not answer was handed back as is.
    Passthrough,
    /// Served through the `/auth/token` relay.
    Token,
    Disguise,
    Error,
}

impl std::fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayStatus::Relayed => write!(f, "relayed"),
            RelayStatus::Authenticated => write!(f, "authenticated"),
            RelayStatus::Passthrough => write!(f, "passthrough"),
            RelayStatus::Token => write!(f, "token"),
            RelayStatus::Disguise => write!(f, "disguise"),
            RelayStatus::Error => write!(f, "error"),
        }
    }
}

/// Request context for tracking request lifecycle
pub struct RequestContext {
    pub start: Instant,
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub status: RelayStatus,
    pub hops: u32,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            request_id: request_id(),
            method: Method::GET,
            path: String::new(),
            status: RelayStatus::Relayed,
            hops: 0,
        }
    }
}

impl RequestContext {
    pub fn from_request(req: &Request<Body>) -> Self {
        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            ..Self::default()
        }
    }

    pub fn summary(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Per-request identifier: wall-clock nanoseconds at arrival.
pub fn request_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
        .to_string()
}
