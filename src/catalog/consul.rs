//! Catalog backed by the consul health API.

use super::{Catalog, QueryMeta, QueryOptions};
use crate::{Error, ServiceEntry, TargetDescriptor};
use async_trait::async_trait;
use serde::Deserialize;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Errors from querying consul.
#[derive(Debug, thiserror::Error)]
pub enum ConsulError {
    /// Transport errors and non-success responses
    #[error("consul request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The index header was present but not a number
    #[error("invalid X-Consul-Index header `{0}`")]
    Index(String),
}

/// Queries `/v1/health/service/:service` on a consul agent or server.
#[derive(Debug, Clone)]
pub struct ConsulCatalog {
    http: reqwest::Client,
    base: String,
    user: String,
    password: String,
    token: String,
}

impl ConsulCatalog {
    /// Creates a catalog talking to the registry named by `target`.
    pub fn new(target: &TargetDescriptor) -> Result<Self, Error> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(target.tls_insecure);
        if !target.timeout.is_zero() {
            builder = builder.timeout(target.timeout);
        }
        let http = builder.build().map_err(|e| Error::RegistryUnreachable {
            address: target.registry_address.clone(),
            source: Box::new(e),
        })?;

        let address = target.registry_address.trim_end_matches('/');
        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        Ok(Self {
            http,
            base,
            user: target.credentials.user.clone(),
            password: target.credentials.password.clone(),
            token: target.credentials.token.clone(),
        })
    }

    fn query_params(
        tag: &str,
        healthy_only: bool,
        opts: &QueryOptions,
    ) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if !tag.is_empty() {
            params.push(("tag", tag.to_string()));
        }
        if healthy_only {
            params.push(("passing", String::from("1")));
        }
        if !opts.near.is_empty() {
            params.push(("near", opts.near.clone()));
        }
        if opts.wait_index > 0 {
            params.push(("index", opts.wait_index.to_string()));
        }
        if !opts.wait.is_zero() {
            params.push(("wait", format!("{}ms", opts.wait.as_millis())));
        }
        if !opts.datacenter.is_empty() {
            params.push(("dc", opts.datacenter.clone()));
        }
        if opts.allow_stale {
            params.push(("stale", String::new()));
        }
        if opts.require_consistent {
            params.push(("consistent", String::new()));
        }
        params
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: Node,
    service: AgentService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Node {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(default)]
    address: String,
    port: u16,
}

impl From<HealthEntry> for ServiceEntry {
    fn from(entry: HealthEntry) -> Self {
        // Services registered without an address are reachable on their node's.
        let host = if entry.service.address.is_empty() {
            entry.node.address
        } else {
            entry.service.address
        };
        ServiceEntry::new(host, entry.service.port)
    }
}

fn decode(entries: Vec<HealthEntry>) -> Vec<ServiceEntry> {
    entries.into_iter().map(ServiceEntry::from).collect()
}

#[async_trait]
impl Catalog for ConsulCatalog {
    type Error = ConsulError;

    async fn query(
        &self,
        service: &str,
        tag: &str,
        healthy_only: bool,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta), Self::Error> {
        let mut request = self
            .http
            .get(format!("{}/v1/health/service/{service}", self.base))
            .query(&Self::query_params(tag, healthy_only, opts));
        if !self.token.is_empty() {
            request = request.header(TOKEN_HEADER, self.token.as_str());
        }
        if !self.user.is_empty() && !self.password.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.password));
        }

        let response = request.send().await?.error_for_status()?;
        let last_index = match response.headers().get(INDEX_HEADER) {
            None => 0,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| {
                    ConsulError::Index(String::from_utf8_lossy(value.as_bytes()).into())
                })?,
        };
        let entries = response.json::<Vec<HealthEntry>>().await?;

        Ok((decode(entries), QueryMeta { last_index }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn decodes_health_entries() {
        let body = r#"[
            {"Node": {"Node": "a", "Address": "10.0.0.9"},
             "Service": {"ID": "billing-1", "Service": "billing", "Address": "10.0.1.1", "Port": 9000},
             "Checks": []},
            {"Node": {"Node": "b", "Address": "10.0.0.10"},
             "Service": {"ID": "billing-2", "Service": "billing", "Address": "", "Port": 9001},
             "Checks": []}
        ]"#;
        let entries = decode(serde_json::from_str(body).unwrap());
        assert_eq!(
            entries,
            vec![
                ServiceEntry::new("10.0.1.1", 9000),
                ServiceEntry::new("10.0.0.10", 9001),
            ]
        );
    }

    #[test]
    fn query_params_follow_options() {
        let opts = QueryOptions {
            wait_index: 42,
            near: "_agent".to_string(),
            wait: Duration::from_secs(5),
            datacenter: "dc1".to_string(),
            allow_stale: true,
            require_consistent: false,
        };
        let params = ConsulCatalog::query_params("v2", true, &opts);
        let keys = params.iter().map(|(k, _)| *k).collect::<Vec<_>>();
        assert_eq!(keys, ["tag", "passing", "near", "index", "wait", "dc", "stale"]);
        assert!(params.contains(&("wait", "5000ms".to_string())));
        assert!(params.contains(&("index", "42".to_string())));

        let first = ConsulCatalog::query_params("", false, &QueryOptions::default());
        assert!(first.is_empty());
    }

    #[test]
    fn registry_address_gets_a_scheme() {
        let mut target = TargetDescriptor::parse("consul://10.0.0.1:8500/billing").unwrap();
        assert_eq!(ConsulCatalog::new(&target).unwrap().base, "http://10.0.0.1:8500");
        target.registry_address = "https://consul.internal/".to_string();
        assert_eq!(ConsulCatalog::new(&target).unwrap().base, "https://consul.internal");
    }
}
