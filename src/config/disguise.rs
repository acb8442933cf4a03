use serde::Deserialize;

/// Site that receives every request outside the registry API surface.
#[derive(Debug, Clone, Deserialize)]
pub struct DisguiseConfig {
    #[serde(default = "DisguiseConfig::default_enabled")]
    pub enabled: bool,
    /// Host name reached over HTTPS, or a full base URL such as `http://127.0.0.1:8080`.
    #[serde(default = "DisguiseConfig::default_host")]
    pub host: String,
}

impl DisguiseConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_host() -> String {
        "www.bing.com".to_string()
    }
}

impl Default for DisguiseConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            host: Self::default_host(),
        }
    }
}
