use std::path::PathBuf;

use anyhow::{Context, Result};
use rama::http::{Body, HeaderValue, Request, Response, Uri, header};
use tracing::debug;
use url::Url;

use super::spool::RequestBody;
use super::{headers, response};
use crate::config::DisguiseConfig;
use crate::error::RelayResult;
use crate::upstream::UpstreamClient;

/// Sends everything that is not registry traffic to an ordinary website, so
/// the listener looks like a plain web front.
///
/// No auth handling and no redirect following: whatever the site answers is
/// what the caller gets.
#[derive(Clone)]
pub struct Disguise {
    client: UpstreamClient,
    base: Url,
    spool_dir: Option<PathBuf>,
}

impl Disguise {
    pub fn new(
        config: &DisguiseConfig,
        client: UpstreamClient,
        spool_dir: Option<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            client,
            base: base_url(&config.host)?,
            spool_dir,
        })
    }

    pub fn target(&self, uri: &Uri) -> Url {
        let mut target = self.base.clone();
        target.set_path(uri.path());
        target.set_query(uri.query());
        target
    }

    pub async fn relay(&self, req: Request<Body>, request_id: &str) -> RelayResult<Response<Body>> {
        let (parts, body) = req.into_parts();
        let body = RequestBody::capture(&parts.method, body, self.spool_dir.as_deref()).await?;

        let mut inbound = parts.headers;
        match body.len() {
            Some(len) => {
                inbound.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
            None => {
                inbound.remove(header::CONTENT_LENGTH);
            }
        }

        let target = self.target(&parts.uri);
        let outbound = headers::prepare(&inbound, &headers::host_value(&target), None);
        debug!(request_id, url = %target, "disguise");

        let upstream = self
            .client
            .forward(parts.method.clone(), &target, outbound, body.replay()?)
            .await?;
        response::deliver(upstream, &parts.method, None, request_id)
    }
}

/// A bare host name means `https://<host>`; anything with a scheme is taken as a base URL.
fn base_url(host: &str) -> Result<Url> {
    let host = host.trim();
    let raw = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    Url::parse(&raw).with_context(|| format!("invalid disguise host {host:?}"))
}
