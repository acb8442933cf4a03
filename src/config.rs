use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub mod disguise;
pub mod logging;
pub mod server;
pub mod spool;
pub mod upstream;


pub use disguise::DisguiseConfig;
pub use logging::LoggingConfig;
pub use server::ServerConfig;
pub use spool::SpoolConfig;
pub use upstream::UpstreamConfig;

pub const DEFAULT_CONFIG_FILE: &str = "hubp.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub disguise: DisguiseConfig,
    #[serde(default)]
    pub spool: SpoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let candidate = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if candidate.exists() {
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read config {}", candidate.display()))?;
            let mut config: Config = toml::from_str(&raw)
                .with_context(|| format!("invalid config {}", candidate.display()))?;
            config
                .spool
                .normalize_paths(candidate.parent().unwrap_or(Path::new(".")));
            Ok(config)
        } else {
            if let Some(path) = candidate.to_str() {
                tracing::warn!("configuration file {path} not found, using defaults");
            } else {
                tracing::warn!("configuration file not found, using defaults");
            }
            let mut config = Config::default();
            let cwd = std::env::current_dir().context("reading current directory")?;
            config.spool.normalize_paths(&cwd);
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.upstream.validate()?;
        self.logging.validate()?;
        if self.disguise.enabled && self.disguise.host.trim().is_empty() {
            bail!("disguise.host must be set when the disguise is enabled");
        }
        if self.server.workers == 0 {
            bail!("server.workers must be at least 1");
        }
        Ok(())
    }
}
