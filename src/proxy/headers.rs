use rama::http::{HeaderMap, HeaderName, HeaderValue, header};
use tracing::warn;
use url::Url;

/// Connection-scoped headers never cross the proxy in either direction.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// `Host` value for a target: host plus port when it is not the scheme default.
pub fn host_value(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default();
    match target.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Builds the outbound header set for one upstream hop.
///
/// Every inbound value is copied in order, `Accept-Encoding` and hop-by-hop
/// headers are dropped, `Host` names the hop's own host, and a supplied token
/// replaces any `Authorization` the client sent.
pub fn prepare(inbound: &HeaderMap, host: &str, token: Option<&str>) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len() + 2);
    for (name, value) in inbound {
        if name == header::ACCEPT_ENCODING || name == header::HOST || is_hop_by_hop(name) {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    match HeaderValue::from_str(host) {
        Ok(value) => {
            outbound.insert(header::HOST, value);
        }
        Err(err) => warn!(host, error = %err, "cannot express upstream host as header"),
    }

    if let Some(token) = token {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                outbound.insert(header::AUTHORIZATION, value);
            }
            Err(err) => warn!(error = %err, "token is not a valid header value, sending without it"),
        }
    }

    outbound
}

/// Copies response headers, leaving out hop-by-hop ones.
pub fn copy_response_headers(source: &HeaderMap, target: &mut HeaderMap) {
    for (name, value) in source {
        if is_hop_by_hop(name) {
            continue;
        }
        target.append(name.clone(), value.clone());
    }
}
