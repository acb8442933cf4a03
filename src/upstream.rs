use anyhow::{Context, Result};
use rama::http::{HeaderMap, Method};
use reqwest::redirect;
use tracing::{debug, info};
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::{RelayError, RelayResult};

const UA: &str = concat!("hubp/", env!("CARGO_PKG_VERSION"));

/// Issues exactly one upstream call per invocation.
///
/// Redirects are never followed here: the relay walks them itself so it can
/// re-apply the bearer token on every hop. Transport failures are not retried.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(config.timeout())
            .read_timeout(config.timeout())
            .user_agent(UA)
            .build()
            .context("building upstream http client")?;

        info!(
            timeout_secs = config.timeout_secs,
            registry = %config.registry_url,
            "Upstream client initialized (reqwest + rustls, redirects disabled)",
        );

        Ok(Self { http })
    }

    /// Sends one request. `body` is `None` for bodiless methods.
    pub async fn forward(
        &self,
        method: Method,
        url: &Url,
        headers: HeaderMap,
        body: Option<reqwest::Body>,
    ) -> RelayResult<reqwest::Response> {
        debug!(%method, %url, "forwarding upstream");
        let mut request = self.http.request(method, url.clone()).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        request
            .send()
            .await
            .map_err(|err| RelayError::network(url.as_str(), err))
    }

    /// Plain GET, used for token endpoint calls.
    pub async fn get(&self, url: Url) -> reqwest::Result<reqwest::Response> {
        debug!(%url, "fetching");
        self.http.get(url).send().await
    }
}
