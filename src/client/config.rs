//! Client settings loaded from configuration files.

use super::ClientOptions;
use serde::Deserialize;
use std::time::Duration;

/// Client settings as they appear in configuration files.
///
/// ```text
/// [billing]
/// scheme = "consul"
/// authority = "127.0.0.1:8500"
/// endpoint = "billing?healthy=true"
/// timeout = "3s"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct ClientConfig {
    /// Literal target.
    pub target: String,
    /// Resolver scheme.
    pub scheme: String,
    /// Authority, e.g. the registry address.
    pub authority: String,
    /// Logical endpoint.
    pub endpoint: String,
    /// Fallback proxy address.
    pub proxy_address: String,
    /// Dial timeout of blocking dials.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Call retries.
    pub retry_max: u32,
    /// Whether dialing blocks until the target is resolved.
    pub block: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            scheme: String::new(),
            authority: String::new(),
            endpoint: String::new(),
            proxy_address: String::new(),
            timeout: Duration::from_secs(3),
            retry_max: 3,
            block: false,
        }
    }
}

impl From<ClientConfig> for ClientOptions {
    fn from(config: ClientConfig) -> Self {
        let options = ClientOptions::new()
            .target(config.target)
            .scheme(config.scheme)
            .authority(config.authority)
            .endpoint(config.endpoint)
            .proxy_address(config.proxy_address)
            .timeout(config.timeout)
            .retry_max(config.retry_max);
        if config.block {
            options.block()
        } else {
            options
        }
    }
}
