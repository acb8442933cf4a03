mod disguise;
mod headers;
mod redirect;
mod relay;
mod response;
mod spool;
mod token;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use rama::{
    Service,
    error::BoxError,
    http::{Body, Request, Response, StatusCode, header},
};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::RelayResult;
use crate::registry::{TokenCache, TokenResolver};
use crate::upstream::UpstreamClient;

pub use disguise::Disguise;
pub use relay::{RelayEngine, RelayOutcome};
pub use response::{TOKEN_PATH, deliver, respond_text, rewrite_challenge};
pub use spool::{RequestBody, SpooledBody};
pub use token::TokenRelay;
pub use types::{RelayStatus, RequestContext, request_id};

/// Main proxy service
#[derive(Clone)]
pub struct RegistryProxy {
    config: Arc<Config>,
    relay: RelayEngine,
    token: TokenRelay,
    disguise: Option<Disguise>,
}

impl RegistryProxy {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = UpstreamClient::new(&config.upstream).context("building upstream client")?;
        let cache = Arc::new(TokenCache::new());
        let auth = TokenResolver::new(client.clone(), cache, config.upstream.token_ttl());
        let relay = RelayEngine::new(&config, client.clone(), auth);
        let token = TokenRelay::new(client.clone(), config.upstream.auth_url.clone());

        let disguise = if config.disguise.enabled {
            Some(
                Disguise::new(&config.disguise, client, config.spool.dir.clone())
                    .context("configuring disguise")?,
            )
        } else {
            tracing::info!("Disguise disabled - non-registry paths answer 404");
            None
        };

        Ok(Self {
            config,
            relay,
            token,
            disguise,
        })
    }

    async fn handle(&self, req: Request<Body>, ctx: &mut RequestContext) -> RelayResult<Response<Body>> {
        let path = req.uri().path();

        if path.starts_with(self.config.upstream.path_prefix.as_str()) {
            return self.handle_registry(req, ctx).await;
        }

        if path == TOKEN_PATH {
            ctx.status = RelayStatus::Token;
            return self.token.relay(req, &ctx.request_id).await;
        }

        match &self.disguise {
            Some(disguise) => {
                ctx.status = RelayStatus::Disguise;
                disguise.relay(req, &ctx.request_id).await
            }
            None => {
                ctx.status = RelayStatus::Disguise;
                respond_text(StatusCode::NOT_FOUND, "not found")
            }
        }
    }

    async fn handle_registry(
        &self,
        req: Request<Body>,
        ctx: &mut RequestContext,
    ) -> RelayResult<Response<Body>> {
        let proxy_host = proxy_host(&req);
        let method = req.method().clone();
        let outcome = self.relay.relay(req, &ctx.request_id).await?;

        ctx.hops = outcome.hops;
        debug!(
            request_id = %ctx.request_id,
            target = %outcome.target,
            status = %outcome.response.status(),
            "relay finished"
        );
        ctx.status = if outcome.challenge_failed {
            RelayStatus::Passthrough
        } else if outcome.authenticated {
            RelayStatus::Authenticated
        } else {
            RelayStatus::Relayed
        };

        deliver(outcome.response, &method, proxy_host.as_deref(), &ctx.request_id)
    }
}

/// The host the client addressed, used to point challenges back at this proxy.
fn proxy_host(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .or_else(|| req.uri().authority().map(|authority| authority.to_string()))
}

impl Service<Request<Body>> for RegistryProxy {
    type Output = Response<Body>;
    type Error = BoxError;

    async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let mut ctx = RequestContext::from_request(&req);

        let result = self.handle(req, &mut ctx).await;
        let duration_ms = ctx.start.elapsed().as_millis();

        let resp = match result {
            Ok(resp) => {
                info!(
                    request_id = %ctx.request_id,
                    summary = %ctx.summary(),
                    response_code = resp.status().as_u16(),
                    outcome = %ctx.status,
                    hops = ctx.hops,
                    duration_ms,
                    "request handled"
                );
                resp
            }
            Err(err) => {
                ctx.status = RelayStatus::Error;
                error!(
                    request_id = %ctx.request_id,
                    summary = %ctx.summary(),
                    response_code = err.status().as_u16(),
                    outcome = %ctx.status,
                    duration_ms,
                    error = %err,
                    "request failed"
                );
                response::respond_error(&err)
            }
        };

        Ok(resp)
    }
}
