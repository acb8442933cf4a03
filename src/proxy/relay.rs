use std::path::PathBuf;

use rama::http::{Body, HeaderValue, Request, StatusCode, Uri, header};
use tracing::debug;
use url::Url;

use super::headers;
use super::redirect;
use super::spool::RequestBody;
use crate::config::Config;
use crate::error::{ChallengeError, RelayError, RelayResult};
use crate::registry::TokenResolver;
use crate::upstream::UpstreamClient;

/// Where a relay stopped and how it got there.
#[derive(Debug)]
pub struct RelayOutcome {
    pub response: reqwest::Response,
    /// The last hop was sent with a bearer token obtained by the proxy.
    pub authenticated: bool,
    /// An auth challenge was seen but could not be resolved.
    pub challenge_failed: bool,
    pub hops: u32,
    pub target: Url,
}

/// Drives one inbound registry request to its terminal upstream response:
/// forward, answer a single auth challenge, follow a bounded redirect chain.
#[derive(Clone)]
pub struct RelayEngine {
    client: UpstreamClient,
    auth: TokenResolver,
    registry: Url,
    max_hops: u32,
    strip_auth_on_cross_origin: bool,
    spool_dir: Option<PathBuf>,
}

impl RelayEngine {
    pub fn new(config: &Config, client: UpstreamClient, auth: TokenResolver) -> Self {
        Self {
            client,
            auth,
            registry: config.upstream.registry_url.clone(),
            max_hops: config.upstream.max_hops,
            strip_auth_on_cross_origin: config.upstream.strip_auth_on_cross_origin,
            spool_dir: config.spool.dir.clone(),
        }
    }

    /// Upstream host plus the inbound path and query, unchanged.
    pub fn initial_target(&self, uri: &Uri) -> Url {
        let mut target = self.registry.clone();
        target.set_path(uri.path());
        target.set_query(uri.query());
        target
    }

    pub async fn relay(&self, req: Request<Body>, request_id: &str) -> RelayResult<RelayOutcome> {
        let (parts, body) = req.into_parts();
        let body = RequestBody::capture(&parts.method, body, self.spool_dir.as_deref()).await?;

        let mut inbound_headers = parts.headers;
        // A dropped GET/HEAD body must not leave its stated length behind.
        match body.len() {
            Some(len) => {
                inbound_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
            None => {
                inbound_headers.remove(header::CONTENT_LENGTH);
            }
        }

        let mut target = self.initial_target(&parts.uri);
        let mut token: Option<String> = None;
        let mut auth_attempted = false;
        let mut hops = 0u32;

        loop {
            let send_token = token.as_deref().filter(|_| self.carries_token(&target));
            let authenticated = send_token.is_some();
            let outbound =
                headers::prepare(&inbound_headers, &headers::host_value(&target), send_token);
            debug!(
                request_id,
                method = %parts.method,
                url = %target,
                authenticated,
                hop = hops,
                "forwarding"
            );

            let response = self
                .client
                .forward(parts.method.clone(), &target, outbound, body.replay()?)
                .await?;
            let status = response.status();

            // Only the first 401 is answered; a 401 to the authenticated retry is final.
            if status == StatusCode::UNAUTHORIZED && !auth_attempted {
                auth_attempted = true;
                let challenge = response
                    .headers()
                    .get(header::WWW_AUTHENTICATE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                match self.authenticate(challenge.as_deref(), request_id).await {
                    Ok(fresh) => {
                        debug!(request_id, "retrying with token");
                        token = Some(fresh);
                        drop(response);
                        continue;
                    }
                    Err(err) => {
                        debug!(request_id, error = %err, "cannot authenticate, passing 401 through");
                        return Ok(RelayOutcome {
                            response,
                            authenticated: false,
                            challenge_failed: true,
                            hops,
                            target,
                        });
                    }
                }
            }

            if redirect::is_redirect(status) {
                if let Some(location) = redirect::location(response.headers()) {
                    hops += 1;
                    if hops > self.max_hops {
                        return Err(RelayError::TooManyHops(self.max_hops));
                    }
                    let next = redirect::resolve(&target, location)?;
                    debug!(request_id, %status, from = %target, to = %next, "following redirect");
                    drop(response);
                    target = next;
                    continue;
                }
                debug!(request_id, %status, "redirect without location, passing through");
            }

            return Ok(RelayOutcome {
                response,
                authenticated,
                challenge_failed: false,
                hops,
                target,
            });
        }
    }

    async fn authenticate(
        &self,
        challenge: Option<&str>,
        request_id: &str,
    ) -> Result<String, ChallengeError> {
        let challenge = challenge.ok_or(ChallengeError::IncompleteParams)?;
        debug!(request_id, %challenge, "upstream requires auth");
        self.auth.resolve(challenge, request_id).await
    }

    fn carries_token(&self, target: &Url) -> bool {
        !self.strip_auth_on_cross_origin || redirect::same_origin(&self.registry, target)
    }
}
