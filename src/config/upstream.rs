use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Registry API host every `/v2/` request is relayed to.
    #[serde(default = "default_registry_url", with = "serde_url")]
    pub registry_url: Url,
    /// Token endpoint answering the proxy's own `/auth/token` path.
    #[serde(default = "default_auth_url", with = "serde_url")]
    pub auth_url: Url,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Connect and read timeout for every upstream call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Redirect ceiling for a single relay.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    /// Token lifetime used when the token endpoint does not state one.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    /// Drop the bearer token when a redirect leaves the registry origin.
    #[serde(default)]
    pub strip_auth_on_cross_origin: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            auth_url: default_auth_url(),
            path_prefix: default_path_prefix(),
            timeout_secs: default_timeout_secs(),
            max_hops: default_max_hops(),
            token_ttl_secs: default_token_ttl_secs(),
            strip_auth_on_cross_origin: false,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("upstream.registry_url", &self.registry_url),
            ("upstream.auth_url", &self.auth_url),
        ] {
            if url.scheme() != "https" && url.scheme() != "http" {
                bail!("unsupported scheme for {name}: {url}");
            }
            if url.host_str().is_none() {
                bail!("{name} has no host: {url}");
            }
        }
        if !self.path_prefix.starts_with('/') || !self.path_prefix.ends_with('/') {
            bail!(
                "upstream.path_prefix must start and end with '/', got {:?}",
                self.path_prefix
            );
        }
        if self.timeout_secs == 0 {
            bail!("upstream.timeout_secs must be greater than zero");
        }
        if self.max_hops == 0 {
            bail!("upstream.max_hops must be greater than zero");
        }
        if self.token_ttl_secs == 0 {
            bail!("upstream.token_ttl_secs must be greater than zero");
        }
        Ok(())
    }
}

fn default_registry_url() -> Url {
    Url::parse("https://registry-1.docker.io").expect("static registry url parses")
}

fn default_auth_url() -> Url {
    Url::parse("https://auth.docker.io/token").expect("static auth url parses")
}

fn default_path_prefix() -> String {
    "/v2/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_hops() -> u32 {
    10
}

fn default_token_ttl_secs() -> u64 {
    300
}

mod serde_url {
    use serde::{Deserialize, Deserializer};
    use url::Url;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Url, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Url::parse(&s).map_err(serde::de::Error::custom)
    }
}
