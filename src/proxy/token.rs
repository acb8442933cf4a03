use rama::http::{Body, Method, Request, Response, StatusCode};
use tracing::debug;
use url::Url;

use super::{headers, response};
use crate::error::RelayResult;
use crate::upstream::UpstreamClient;

/// Answers the proxy's own token path by relaying to the real token endpoint.
///
/// Clients land here after following a rewritten challenge realm. The query
/// (`service`, `scope`, possibly repeated) goes through untouched.
#[derive(Clone)]
pub struct TokenRelay {
    client: UpstreamClient,
    auth_url: Url,
}

impl TokenRelay {
    pub fn new(client: UpstreamClient, auth_url: Url) -> Self {
        Self { client, auth_url }
    }

    pub fn accepts(method: &Method) -> bool {
        method == Method::GET || method == Method::HEAD
    }

    pub fn target(&self, query: Option<&str>) -> Url {
        let mut target = self.auth_url.clone();
        if query.is_some() {
            target.set_query(query);
        }
        target
    }

    pub async fn relay(&self, req: Request<Body>, request_id: &str) -> RelayResult<Response<Body>> {
        if !Self::accepts(req.method()) {
            return response::respond_text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }

        let target = self.target(req.uri().query());
        let outbound = headers::prepare(req.headers(), &headers::host_value(&target), None);
        debug!(request_id, url = %target, "relaying token request");

        let upstream = self
            .client
            .forward(req.method().clone(), &target, outbound, None)
            .await?;
        response::deliver(upstream, req.method(), None, request_id)
    }
}
