//! Catalog backed by DNS via [`hickory_resolver`].

use super::{Catalog, QueryMeta, QueryOptions};
use crate::ServiceEntry;
use async_trait::async_trait;
use hickory_resolver::{
    config::{NameServerConfigGroup, ResolverConfig},
    name_server::TokioConnectionProvider,
    ResolveError, Resolver, TokioResolver,
};
use std::net::SocketAddr;

/// Resolves `host:port` names through A/AAAA records and bare names through
/// SRV records.
///
/// DNS has no notion of tags, health or change indexes, so those query
/// options are ignored and every query reports index 0.
#[derive(Clone)]
pub struct DnsCatalog {
    resolver: TokioResolver,
    proxy: Option<ServiceEntry>,
}

impl std::fmt::Debug for DnsCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsCatalog")
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

impl DnsCatalog {
    /// Creates a catalog using `nameserver`, or the system configuration
    /// when `None`.
    ///
    /// When `proxy` is set it is returned as the only instance whenever DNS
    /// fails or finds nothing.
    pub fn new(
        nameserver: Option<SocketAddr>,
        proxy: Option<ServiceEntry>,
    ) -> Result<Self, ResolveError> {
        let resolver = match nameserver {
            Some(addr) => {
                let servers =
                    NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
                let config = ResolverConfig::from_parts(None, vec![], servers);
                Resolver::builder_with_config(config, TokioConnectionProvider::default()).build()
            }
            None => Resolver::builder_tokio()?.build(),
        };
        Ok(Self { resolver, proxy })
    }

    async fn lookup(&self, name: &str) -> Result<Vec<ServiceEntry>, ResolveError> {
        match ServiceEntry::parse(name) {
            Some(ServiceEntry { host, port }) => {
                let ips = self.resolver.lookup_ip(host.as_str()).await?;
                Ok(ips.iter().map(|ip| ServiceEntry::new(ip.to_string(), port)).collect())
            }
            None => {
                let records = self.resolver.srv_lookup(name).await?;
                Ok(records
                    .iter()
                    .map(|srv| {
                        let target = srv.target().to_utf8();
                        ServiceEntry::new(target.trim_end_matches('.'), srv.port())
                    })
                    .collect())
            }
        }
    }
}

#[async_trait]
impl Catalog for DnsCatalog {
    type Error = ResolveError;

    async fn query(
        &self,
        service: &str,
        _tag: &str,
        _healthy_only: bool,
        _opts: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta), Self::Error> {
        let result = self.lookup(service).await;
        let entries = match (result, &self.proxy) {
            (Ok(entries), _) if !entries.is_empty() => entries,
            (Ok(_), Some(proxy)) => {
                #[cfg(feature = "log")]
                tracing::debug!(service, %proxy, "DNS returned no records, using fallback proxy");
                vec![proxy.clone()]
            }
            (Err(e), Some(proxy)) => {
                #[cfg(feature = "log")]
                tracing::debug!(
                    service,
                    %proxy,
                    error = %e,
                    "DNS lookup failed, using fallback proxy"
                );
                #[cfg(not(feature = "log"))]
                let _ = e;
                vec![proxy.clone()]
            }
            (result, None) => result?,
        };
        Ok((entries, QueryMeta::default()))
    }
}
